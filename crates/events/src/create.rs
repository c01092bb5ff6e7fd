//! Provisioning contract for idempotently created entities.

use chrono::{DateTime, Utc};

use paycore_core::{
    Aggregate, DomainError, EntityId, EntityKind, ExternalId, PartyId, ReferenceLookups,
};

use crate::migration::MigrationChain;

/// Contract implemented by every entity kind the create command processor can
/// provision.
///
/// The processor drives the whole creation lifecycle through this trait:
/// resolving the internal id from the dedup key, rehydrating any existing
/// aggregate, deciding whether a retry is an idempotent replay or a conflict,
/// validating referenced entities, and emitting the initial event batch.
///
/// Implementations stay pure: every method here either constructs events or
/// inspects state; IO happens only in the processor through its injected
/// stores.
pub trait CreatableEntity: Aggregate<Error = DomainError> + Sized {
    /// Kind tag used in idempotency keys and as the stream's aggregate type.
    const KIND: EntityKind;

    /// Current schema version new events of this kind are written at.
    const SCHEMA_VERSION: u32;

    /// Create-request parameters for this kind.
    type Params: Clone + core::fmt::Debug;

    /// Empty shell for rehydration; `created()` is false until a creation
    /// event has been folded.
    fn empty(id: EntityId) -> Self;

    /// Whether a creation event has been observed. Absence of a created
    /// aggregate is represented by "no creation event", never by deletion.
    fn created(&self) -> bool;

    /// Client-supplied dedup key, if the request carries one.
    fn external_id(params: &Self::Params) -> Option<&ExternalId>;

    /// Migration chain for this kind's own events.
    fn migrations() -> MigrationChain;

    /// Route a stored event type to the chain that owns its versioning.
    ///
    /// Kinds embedding a sub-aggregate override this so sub-aggregate events
    /// migrate through the sub-aggregate's own chain.
    fn migrations_for(event_type: &str) -> MigrationChain {
        let _ = event_type;
        Self::migrations()
    }

    /// Validate entities referenced by the params against the external
    /// lookup collaborators. Failures are terminal domain errors; nothing
    /// may be created on failure.
    fn validate_references(
        owner: PartyId,
        params: &Self::Params,
        refs: &dyn ReferenceLookups,
    ) -> Result<(), DomainError>;

    /// Entity-specific equality subset for idempotent-replay detection.
    ///
    /// Compares only the defining fields of this kind against the retried
    /// params — deliberately not full structural equality, so retries that
    /// omit optional fields still count as replays.
    fn matches_replay(&self, params: &Self::Params) -> bool;

    /// Initial event batch for a new aggregate: the creation event, any
    /// sub-aggregate initialization events, and the initial status
    /// transition.
    fn creation_events(
        id: EntityId,
        owner: PartyId,
        params: &Self::Params,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<Self::Event>, DomainError>;

    /// Status authorization: exactly one `StatusChanged(Authorized)` event
    /// when unauthorized, no events when already authorized. Safe to call
    /// repeatedly.
    fn authorize_events(
        &self,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<Self::Event>, DomainError>;
}
