//! A one-way event feed from the Tunnel Coordinator to the Service
//! Manager, breaking the cyclic reference that would otherwise exist
//! between the two (the coordinator pushes interfaces; the manager never
//! needs anything back from the coordinator).

use std::collections::HashMap;
use std::net::IpAddr;

use parking_lot::RwLock;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceEvent {
    Added { name: String, ip: IpAddr },
    Removed { name: String },
}

/// Shared map of OS interface name -> bound IP. The Tunnel Coordinator is
/// the sole writer; the Service Manager is the sole consumer of both the
/// snapshot and the event stream.
pub struct InterfaceRegistry {
    interfaces: RwLock<HashMap<String, IpAddr>>,
    events: broadcast::Sender<InterfaceEvent>,
}

impl Default for InterfaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            interfaces: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InterfaceEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> HashMap<String, IpAddr> {
        self.interfaces.read().clone()
    }

    pub fn add(&self, name: impl Into<String>, ip: IpAddr) {
        let name = name.into();
        self.interfaces.write().insert(name.clone(), ip);
        let _ = self.events.send(InterfaceEvent::Added { name, ip });
    }

    pub fn remove(&self, name: &str) {
        if self.interfaces.write().remove(name).is_some() {
            let _ = self.events.send(InterfaceEvent::Removed {
                name: name.to_string(),
            });
        }
    }

    /// Replaces the entire registry in one shot, emitting `Added`/`Removed`
    /// for exactly the entries that changed. Used by `set_interface_ips`.
    pub fn set_all(&self, desired: HashMap<String, IpAddr>) {
        let mut current = self.interfaces.write();

        let removed: Vec<String> = current
            .keys()
            .filter(|name| !desired.contains_key(*name))
            .cloned()
            .collect();
        let added: Vec<(String, IpAddr)> = desired
            .iter()
            .filter(|(name, ip)| current.get(*name) != Some(*ip))
            .map(|(name, ip)| (name.clone(), *ip))
            .collect();

        *current = desired;
        drop(current);

        for name in removed {
            let _ = self.events.send(InterfaceEvent::Removed { name });
        }
        for (name, ip) in added {
            let _ = self.events.send(InterfaceEvent::Added { name, ip });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_snapshot_reflects_entry() {
        let registry = InterfaceRegistry::new();
        registry.add("lo", "127.0.0.1".parse().unwrap());

        let snapshot = registry.snapshot();

        assert_eq!(snapshot.get("lo"), Some(&"127.0.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn subscribers_observe_add_and_remove_events() {
        let registry = InterfaceRegistry::new();
        let mut rx = registry.subscribe();

        registry.add("lo", "127.0.0.1".parse().unwrap());
        registry.remove("lo");

        assert_eq!(
            rx.recv().await.unwrap(),
            InterfaceEvent::Added {
                name: "lo".to_string(),
                ip: "127.0.0.1".parse().unwrap()
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            InterfaceEvent::Removed {
                name: "lo".to_string()
            }
        );
    }

    #[test]
    fn set_all_is_idempotent_in_terms_of_emitted_changes() {
        let registry = InterfaceRegistry::new();
        let mut rx = registry.subscribe();

        let mut desired = HashMap::new();
        desired.insert("lo".to_string(), "127.0.0.1".parse().unwrap());

        registry.set_all(desired.clone());
        registry.set_all(desired);

        // Only the first call should have produced an event.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
