use serde::{Deserialize, Serialize};
use uuid::Uuid;

use paycore_core::{EntityId, PartyId};

/// Envelope for an event, containing owner + stream metadata.
///
/// This is the unit handed to consumers outside the core.
///
/// Notes:
/// - **Owner scoping** is enforced here via `owner`.
/// - **Append-only**: `sequence_number` is monotonically increasing per
///   stream; ordering within a stream is the sole source of truth for state.
/// - `payload` is the domain-agnostic event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    owner: PartyId,

    entity_id: EntityId,
    aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    sequence_number: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        owner: PartyId,
        entity_id: EntityId,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            owner,
            entity_id,
            aggregate_type: aggregate_type.into(),
            sequence_number,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn owner(&self) -> PartyId {
        self.owner
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
