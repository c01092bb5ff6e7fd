//! Create command processing pipeline.
//!
//! One generic pipeline provisions every entity kind:
//!
//! ```text
//! CreateRequest
//!   |
//! 1. Resolve the internal id (dedup key -> atomic get-or-create, or mint)
//!   |
//! 2. Load + migrate + rehydrate the stream for that id
//!   |
//! 3. Already created? idempotent replay or ExternalIdConflict
//!   |
//! 4. Validate referenced entities (lookups; no events on failure)
//!   |
//! 5. Append the creation batch with ExpectedVersion::Exact(0)
//! ```
//!
//! Reference validation runs only for a not-yet-materialized id: a replayed
//! create returns the existing aggregate even if its references have since
//! become inaccessible.
//!
//! Losing the `Exact(0)` race to a concurrent creator is not an error: the
//! loser reloads and resolves the request as a replay or a conflict against
//! the winner's state. Transient store/lookup contention is retried a bounded
//! number of times before surfacing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use uuid::Uuid;

use paycore_core::{
    DomainError, EntityId, ExpectedVersion, PartyId, ReferenceKind, ReferenceLookups,
};
use paycore_events::{CreatableEntity, Event, MigrationContextProvider, MigrationError};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
use crate::idempotency::{IdempotencyError, IdempotencyKey, IdempotencyStore};

/// Bounded retries for transient contention (store or idempotency backend).
const MAX_CONTENTION_RETRIES: u32 = 3;

/// Per-request ambient data: the requesting owner and business time.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub owner: PartyId,
    pub occurred_at: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(owner: PartyId, occurred_at: DateTime<Utc>) -> Self {
        Self { owner, occurred_at }
    }
}

/// Result of a create request: the materialized aggregate plus whether this
/// call actually created it (false for an idempotent replay).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOutcome<E> {
    pub entity_id: EntityId,
    pub entity: E,
    pub newly_created: bool,
}

/// Create/authorize pipeline error.
#[derive(Debug, Error)]
pub enum CreateError {
    /// Deterministic input failure; retrying the same request cannot succeed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The dedup key was replayed with different defining parameters.
    /// Carries the internal id the key is already mapped to.
    #[error("external id already mapped to {0} with different parameters")]
    ExternalIdConflict(EntityId),

    #[error("referenced {0} not found")]
    ReferencedEntityNotFound(ReferenceKind),

    #[error("referenced {kind} inaccessible: {reason}")]
    ReferencedEntityInaccessible {
        kind: ReferenceKind,
        reason: String,
    },

    #[error("not found")]
    NotFound,

    /// Retries exhausted on optimistic-concurrency or transient contention.
    #[error("contention not resolved after {MAX_CONTENTION_RETRIES} retries: {0}")]
    Contention(String),

    /// Fatal schema error; never downgraded or swallowed.
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// Stored payload no longer deserializes into the current event type.
    #[error("event deserialization failed: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),

    #[error(transparent)]
    Idempotency(IdempotencyError),
}

impl From<DomainError> for CreateError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => CreateError::Validation(msg),
            DomainError::InvariantViolation(msg) => CreateError::Validation(msg),
            DomainError::InvalidId(msg) => CreateError::Validation(msg),
            DomainError::ExternalIdConflict(id) => CreateError::ExternalIdConflict(id),
            DomainError::ReferencedEntityNotFound(kind) => {
                CreateError::ReferencedEntityNotFound(kind)
            }
            DomainError::ReferencedEntityInaccessible { kind, reason } => {
                CreateError::ReferencedEntityInaccessible { kind, reason }
            }
            DomainError::NotFound => CreateError::NotFound,
            DomainError::Conflict(msg) => CreateError::Contention(msg),
        }
    }
}

impl From<EventStoreError> for CreateError {
    fn from(value: EventStoreError) -> Self {
        CreateError::Store(value)
    }
}

impl From<IdempotencyError> for CreateError {
    fn from(value: IdempotencyError) -> Self {
        CreateError::Idempotency(value)
    }
}

/// Startup-time assertion that a kind's migration chains are gap-free.
///
/// Call once per registered entity kind before serving requests; a missing
/// step is caught here instead of on the first legacy event read.
pub fn verify_migrations<E: CreatableEntity>() -> Result<(), MigrationError> {
    E::migrations().verify()
}

/// Generic provisioning engine for idempotently created entities.
///
/// Composes the event store, the idempotency mapping and the reference
/// lookups; all entity-kind specifics come through [`CreatableEntity`].
/// Contains no domain decisions itself.
pub struct CreateProcessor<S, I> {
    store: S,
    ids: I,
    refs: Arc<dyn ReferenceLookups>,
    migration_ctx: Arc<dyn MigrationContextProvider>,
}

impl<S, I> CreateProcessor<S, I>
where
    S: EventStore,
    I: IdempotencyStore,
{
    pub fn new(
        store: S,
        ids: I,
        refs: Arc<dyn ReferenceLookups>,
        migration_ctx: Arc<dyn MigrationContextProvider>,
    ) -> Self {
        Self {
            store,
            ids,
            refs,
            migration_ctx,
        }
    }

    /// Process a create request for entity kind `E`.
    ///
    /// Validation failures are terminal and append no events. A replay of a
    /// previously-completed create returns the existing aggregate and
    /// appends nothing.
    pub fn create<E>(
        &self,
        ctx: &RequestContext,
        params: &E::Params,
    ) -> Result<CreateOutcome<E>, CreateError>
    where
        E: CreatableEntity,
        E::Event: Event + Serialize + DeserializeOwned,
    {
        let entity_id = self.resolve_entity_id::<E>(ctx.owner, params)?;

        let mut attempt = 0;
        loop {
            let mut entity = self.rehydrate::<E>(ctx.owner, entity_id)?;

            if entity.created() {
                if entity.matches_replay(params) {
                    tracing::debug!(
                        kind = %E::KIND,
                        entity_id = %entity_id,
                        "create replayed idempotently"
                    );
                    return Ok(CreateOutcome {
                        entity_id,
                        entity,
                        newly_created: false,
                    });
                }
                tracing::warn!(
                    kind = %E::KIND,
                    entity_id = %entity_id,
                    "external id replayed with different parameters"
                );
                return Err(CreateError::ExternalIdConflict(entity_id));
            }

            E::validate_references(ctx.owner, params, self.refs.as_ref())?;

            let events = E::creation_events(entity_id, ctx.owner, params, ctx.occurred_at)?;
            let uncommitted = to_uncommitted(ctx.owner, entity_id, E::KIND.as_str(), &events)?;

            match self.store.append(uncommitted, ExpectedVersion::Exact(0)) {
                Ok(_) => {
                    for event in &events {
                        entity.apply(event);
                    }
                    tracing::info!(
                        kind = %E::KIND,
                        entity_id = %entity_id,
                        events = events.len(),
                        "entity created"
                    );
                    return Ok(CreateOutcome {
                        entity_id,
                        entity,
                        newly_created: true,
                    });
                }
                // Lost the creation race; reload and resolve against the
                // winner's state.
                Err(EventStoreError::Concurrency(msg)) => {
                    attempt += 1;
                    if attempt > MAX_CONTENTION_RETRIES {
                        return Err(CreateError::Contention(msg));
                    }
                    tracing::debug!(
                        kind = %E::KIND,
                        entity_id = %entity_id,
                        attempt,
                        "creation append lost optimistic-concurrency race, reloading"
                    );
                }
                Err(EventStoreError::Contention(msg)) => {
                    attempt += 1;
                    if attempt > MAX_CONTENTION_RETRIES {
                        return Err(CreateError::Contention(msg));
                    }
                    tracing::debug!(
                        kind = %E::KIND,
                        entity_id = %entity_id,
                        attempt,
                        "transient store contention, retrying append"
                    );
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    /// Advance an entity to `Authorized`. Idempotent: an already-authorized
    /// entity appends nothing and is returned as-is.
    pub fn authorize<E>(&self, ctx: &RequestContext, entity_id: EntityId) -> Result<E, CreateError>
    where
        E: CreatableEntity,
        E::Event: Event + Serialize + DeserializeOwned,
    {
        let mut attempt = 0;
        loop {
            let mut entity = self.rehydrate::<E>(ctx.owner, entity_id)?;
            if !entity.created() {
                return Err(CreateError::NotFound);
            }

            let events = entity.authorize_events(ctx.occurred_at)?;
            if events.is_empty() {
                return Ok(entity);
            }

            let expected = ExpectedVersion::Exact(entity.version());
            let uncommitted = to_uncommitted(ctx.owner, entity_id, E::KIND.as_str(), &events)?;
            match self.store.append(uncommitted, expected) {
                Ok(_) => {
                    for event in &events {
                        entity.apply(event);
                    }
                    tracing::info!(
                        kind = %E::KIND,
                        entity_id = %entity_id,
                        "entity authorized"
                    );
                    return Ok(entity);
                }
                Err(EventStoreError::Concurrency(msg))
                | Err(EventStoreError::Contention(msg)) => {
                    attempt += 1;
                    if attempt > MAX_CONTENTION_RETRIES {
                        return Err(CreateError::Contention(msg));
                    }
                    tracing::debug!(
                        kind = %E::KIND,
                        entity_id = %entity_id,
                        attempt,
                        "authorize append contended, reloading"
                    );
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    /// Rehydrate a created entity; `NotFound` if no creation event exists.
    pub fn load<E>(&self, owner: PartyId, entity_id: EntityId) -> Result<E, CreateError>
    where
        E: CreatableEntity,
        E::Event: Event + Serialize + DeserializeOwned,
    {
        let entity = self.rehydrate::<E>(owner, entity_id)?;
        if !entity.created() {
            return Err(CreateError::NotFound);
        }
        Ok(entity)
    }

    /// Resolve the internal id for a create request: dedup-key mapping when
    /// an external id is supplied, otherwise a fresh mint. Transient mapping
    /// failures are retried.
    fn resolve_entity_id<E>(
        &self,
        owner: PartyId,
        params: &E::Params,
    ) -> Result<EntityId, CreateError>
    where
        E: CreatableEntity,
    {
        let Some(external_id) = E::external_id(params) else {
            return Ok(EntityId::new());
        };
        let key = IdempotencyKey::new(E::KIND, owner, external_id.clone());

        let mut attempt = 0;
        loop {
            match self.ids.get_or_create(&key, &EntityId::new) {
                Ok(id) => return Ok(id),
                Err(IdempotencyError::Contention(msg)) => {
                    attempt += 1;
                    if attempt > MAX_CONTENTION_RETRIES {
                        return Err(CreateError::Contention(msg));
                    }
                    tracing::debug!(
                        kind = %E::KIND,
                        attempt,
                        "idempotency lookup contended, retrying"
                    );
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    /// Load, migrate and left-fold the stream for one aggregate.
    ///
    /// Every stored payload is lifted to the current schema version through
    /// the chain owning its event type before deserialization. Migration
    /// gaps are fatal and propagate unchanged.
    fn rehydrate<E>(&self, owner: PartyId, entity_id: EntityId) -> Result<E, CreateError>
    where
        E: CreatableEntity,
        E::Event: Event + DeserializeOwned,
    {
        let history = self.store.load_stream(owner, entity_id)?;
        validate_loaded_stream(owner, entity_id, &history)?;

        let migration_ctx = self.migration_ctx.context_for(entity_id);
        let mut entity = E::empty(entity_id);
        for stored in history {
            let chain = E::migrations_for(&stored.event_type);
            let lifted = chain.migrate(
                &stored.event_type,
                stored.event_version,
                stored.payload,
                &migration_ctx,
            )?;
            let event: E::Event = serde_json::from_value(lifted)
                .map_err(|e| CreateError::Deserialize(e.to_string()))?;
            entity.apply(&event);
        }
        Ok(entity)
    }
}

fn to_uncommitted<E>(
    owner: PartyId,
    entity_id: EntityId,
    aggregate_type: &str,
    events: &[E],
) -> Result<Vec<UncommittedEvent>, CreateError>
where
    E: Event + Serialize,
{
    events
        .iter()
        .map(|event| {
            UncommittedEvent::from_typed(owner, entity_id, aggregate_type, Uuid::now_v7(), event)
                .map_err(CreateError::from)
        })
        .collect()
}

/// Reject a loaded stream that violates owner scoping or sequence
/// monotonicity, whatever the backend claims.
fn validate_loaded_stream(
    owner: PartyId,
    entity_id: EntityId,
    stream: &[StoredEvent],
) -> Result<(), CreateError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.owner != owner {
            return Err(CreateError::Store(EventStoreError::OwnerIsolation(
                format!("loaded stream contains wrong owner at index {idx}"),
            )));
        }
        if e.entity_id != entity_id {
            return Err(CreateError::Store(EventStoreError::OwnerIsolation(
                format!("loaded stream contains wrong entity_id at index {idx}"),
            )));
        }
        if e.sequence_number == 0 {
            return Err(CreateError::Store(EventStoreError::InvalidAppend(
                "stored event has sequence_number=0".to_string(),
            )));
        }
        if e.sequence_number <= last {
            return Err(CreateError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}
