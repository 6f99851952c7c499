//! # Adapters
//!
//! Reference implementations of the outbound ports.

pub mod locator;
pub mod memory_store;
pub mod publisher;
pub mod time;

pub use locator::StaticNodeLocator;
pub use memory_store::InMemoryAttributeStore;
pub use publisher::{NotificationPublisher, DEFAULT_NOTIFICATION_CAPACITY};
pub use time::SystemTimeSource;
