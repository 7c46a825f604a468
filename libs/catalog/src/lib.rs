//! Service catalog storage and tunnel-port allocation.

mod error;
mod port_allocator;
mod service;
mod store;

pub use error::{Error, Result};
pub use port_allocator::PortAllocator;
pub use service::{NewService, Protocol, Service, ServiceUpdate, generate_id};
pub use store::{CatalogStore, InMemoryCatalogStore, default_edge_ui_service};
