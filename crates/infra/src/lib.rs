//! Infrastructure layer: event persistence, idempotency mapping, reference
//! lookups and the generic create/authorize processing pipeline.
//!
//! Everything here composes the domain crates through traits; swapping the
//! in-memory backends for durable ones changes no domain code.

pub mod event_store;
pub mod idempotency;
pub mod processor;
pub mod references;

pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
pub use idempotency::{IdempotencyError, IdempotencyKey, IdempotencyStore, InMemoryIdempotencyStore};
pub use processor::{
    CreateError, CreateOutcome, CreateProcessor, RequestContext, verify_migrations,
};
pub use references::{FixedMigrationContext, InMemoryReferences};
