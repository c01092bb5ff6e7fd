use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use paycore_core::{EntityId, ExpectedVersion, PartyId};
use std::sync::Arc;

/// An event ready to be appended to a stream, before a sequence number is
/// assigned. The store assigns sequence numbers during append.
///
/// Build one with [`UncommittedEvent::from_typed`]: it serializes the typed
/// domain event to JSON and captures the event metadata (`event_type`,
/// `event_version`, `occurred_at`) needed to migrate and deserialize the
/// payload on later reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub owner: PartyId,
    pub entity_id: EntityId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// A persisted event in an append-only stream.
///
/// Sequence numbers are assigned by the store: monotonically increasing,
/// scoped per `(owner, entity_id)` stream, immutable once assigned. The
/// stream's last sequence number is the aggregate version used for
/// optimistic concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub owner: PartyId,
    pub entity_id: EntityId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert a stored event into an owner-scoped envelope for consumers
    /// outside the core.
    pub fn to_envelope(&self) -> paycore_events::EventEnvelope<JsonValue> {
        paycore_events::EventEnvelope::new(
            self.event_id,
            self.owner,
            self.entity_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

/// Event store operation error.
///
/// Infrastructure errors only; domain failures (validation, invariants) are
/// raised before the store is ever touched.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("owner isolation violation: {0}")]
    OwnerIsolation(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    /// Transient backend contention; safe to retry.
    #[error("storage contention: {0}")]
    Contention(String),
}

/// Append-only, owner-scoped event store.
///
/// Events are organized into streams, one stream per aggregate instance,
/// keyed by `(owner, entity_id)`. Within a stream sequence numbers increase
/// monotonically from 1 with no gaps.
///
/// Implementations must:
/// - enforce owner isolation on both read and write
/// - enforce optimistic concurrency against the current stream version
/// - assign sequence numbers atomically (all events in a batch or none)
/// - never modify or delete persisted events
pub trait EventStore: Send + Sync {
    /// Append events to an aggregate stream (append-only).
    ///
    /// `ExpectedVersion::Exact(0)` expresses "this stream must not exist
    /// yet" and is how creation appends detect a concurrent winner.
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Load the full stream for an owner + entity, in sequence order.
    /// Returns an empty vector if the stream does not exist.
    fn load_stream(
        &self,
        owner: PartyId,
        entity_id: EntityId,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(events, expected_version)
    }

    fn load_stream(
        &self,
        owner: PartyId,
        entity_id: EntityId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(owner, entity_id)
    }
}

impl UncommittedEvent {
    /// Convenience constructor from a typed domain event.
    ///
    /// Keeps infra decoupled from the entity modules while still capturing
    /// the metadata needed for migration and deserialization on read.
    pub fn from_typed<E>(
        owner: PartyId,
        entity_id: EntityId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: paycore_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            owner,
            entity_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}
