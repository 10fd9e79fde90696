// ============================================================================
// Event Sourcing Infrastructure
// ============================================================================
//
// Appends events with optimistic concurrency and reads ordered streams back
// from a partitioned key-range store.
//
// ============================================================================

mod core;
pub mod error;
pub mod repository;
pub mod store;

pub use self::core::*;
pub use error::{ConfigError, RepositoryError};
pub use repository::{EventReader, EventRepository, EventRepositoryBuilder, EventWriter};
pub use store::{InMemoryStore, ScyllaStore, StoreClient, StoreError, TableSchema};
