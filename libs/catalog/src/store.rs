use std::collections::BTreeMap;

use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::service::{
    NewService, Protocol, Service, ServiceUpdate, generate_id, validate_name, validate_port,
};

/// Durable mapping from service id to its configuration.
///
/// The spec treats the backing store as abstract; `InMemoryCatalogStore` is
/// the reference implementation used by the agent binary. A durable
/// implementation (sqlite, a flat file, ...) is a drop-in behind this trait.
pub trait CatalogStore: Send + Sync + 'static {
    fn list(&self) -> Vec<Service>;
    fn get(&self, id: &str) -> Option<Service>;
    fn get_by_host_port(&self, host: &str, port: u16) -> Option<Service>;
    fn add(&self, new: NewService, tunnel_port: u16) -> Result<Service>;
    fn update(&self, id: &str, update: ServiceUpdate) -> Result<Service>;
    fn delete(&self, id: &str) -> Result<Service>;
    fn count(&self) -> usize;
    fn clear(&self) -> Vec<Service>;
    fn used_tunnel_ports(&self) -> Vec<u16>;
}

#[derive(Default)]
pub struct InMemoryCatalogStore {
    services: RwLock<BTreeMap<String, Service>>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CatalogStore for InMemoryCatalogStore {
    fn list(&self) -> Vec<Service> {
        let mut services: Vec<_> = self.services.read().values().cloned().collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services
    }

    fn get(&self, id: &str) -> Option<Service> {
        self.services.read().get(id).cloned()
    }

    fn get_by_host_port(&self, host: &str, port: u16) -> Option<Service> {
        self.services
            .read()
            .values()
            .find(|s| s.local_host == host && s.local_port == port)
            .cloned()
    }

    fn add(&self, new: NewService, tunnel_port: u16) -> Result<Service> {
        validate_name(&new.name)?;
        let local_port = validate_port(new.local_port)?;

        let mut services = self.services.write();

        if services
            .values()
            .any(|s| s.local_host == new.local_host && s.local_port == local_port)
        {
            return Err(Error::Conflict(format!(
                "a service already proxies {}:{}",
                new.local_host, local_port
            )));
        }

        let now = Utc::now();
        let service = Service {
            id: generate_id(),
            name: new.name,
            protocol: new.protocol,
            local_host: new.local_host,
            local_port,
            tunnel_port,
            enabled: true,
            created_at: now,
            updated_at: now,
        };

        services.insert(service.id.clone(), service.clone());

        Ok(service)
    }

    fn update(&self, id: &str, update: ServiceUpdate) -> Result<Service> {
        let mut services = self.services.write();
        let service = services
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        if let Some(name) = update.name {
            validate_name(&name)?;
            service.name = name;
        }
        if let Some(host) = update.local_host {
            service.local_host = host;
        }
        if let Some(port) = update.local_port {
            service.local_port = validate_port(port)?;
        }
        if let Some(protocol) = update.protocol {
            service.protocol = protocol;
        }
        if let Some(enabled) = update.enabled {
            service.enabled = enabled;
        }
        service.updated_at = Utc::now();

        Ok(service.clone())
    }

    fn delete(&self, id: &str) -> Result<Service> {
        self.services
            .write()
            .remove(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn count(&self) -> usize {
        self.services.read().len()
    }

    fn clear(&self) -> Vec<Service> {
        let mut services = self.services.write();
        let drained: Vec<_> = services.values().cloned().collect();
        services.clear();
        drained
    }

    fn used_tunnel_ports(&self) -> Vec<u16> {
        self.services.read().values().map(|s| s.tunnel_port).collect()
    }
}

/// Ensures the edge UI's own admin surface is reachable through the
/// catalog, the way the first real service would be.
pub fn default_edge_ui_service(local_port: u16) -> NewService {
    NewService {
        name: "Edge UI".to_string(),
        protocol: Protocol::Http,
        local_host: "127.0.0.1".to_string(),
        local_port: u32::from(local_port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new(name: &str, host: &str, port: u32) -> NewService {
        NewService {
            name: name.to_string(),
            protocol: Protocol::Http,
            local_host: host.to_string(),
            local_port: port,
        }
    }

    #[test]
    fn add_then_get_round_trips() {
        let store = InMemoryCatalogStore::new();
        let created = store.add(new("web", "localhost", 80), 8001).unwrap();

        let fetched = store.get(&created.id).unwrap();

        assert_eq!(created, fetched);
        assert!(fetched.enabled);
    }

    #[test]
    fn add_rejects_duplicate_host_port() {
        let store = InMemoryCatalogStore::new();
        store.add(new("web", "localhost", 80), 8001).unwrap();

        let err = store.add(new("web2", "localhost", 80), 8002).unwrap_err();

        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn add_rejects_empty_name() {
        let store = InMemoryCatalogStore::new();

        let err = store.add(new("", "localhost", 80), 8001).unwrap_err();

        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn add_rejects_out_of_range_port() {
        let store = InMemoryCatalogStore::new();

        assert!(matches!(
            store.add(new("web", "localhost", 0), 8001).unwrap_err(),
            Error::Invalid(_)
        ));
        assert!(matches!(
            store.add(new("web", "localhost", 65536), 8001).unwrap_err(),
            Error::Invalid(_)
        ));
    }

    #[test]
    fn delete_twice_is_not_found() {
        let store = InMemoryCatalogStore::new();
        let created = store.add(new("web", "localhost", 80), 8001).unwrap();

        store.delete(&created.id).unwrap();

        assert!(matches!(
            store.delete(&created.id).unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn list_is_sorted_by_name() {
        let store = InMemoryCatalogStore::new();
        store.add(new("zeta", "localhost", 1), 8001).unwrap();
        store.add(new("alpha", "localhost", 2), 8002).unwrap();

        let names: Vec<_> = store.list().into_iter().map(|s| s.name).collect();

        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn update_merges_only_given_fields() {
        let store = InMemoryCatalogStore::new();
        let created = store.add(new("web", "localhost", 80), 8001).unwrap();

        let updated = store
            .update(
                &created.id,
                ServiceUpdate {
                    name: Some("web2".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.name, "web2");
        assert_eq!(updated.local_host, "localhost");
        assert_eq!(updated.local_port, 80);
    }
}
