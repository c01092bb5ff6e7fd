//! External-id deduplication.
//!
//! Clients retry create requests; the dedup key `(kind, owner, external_id)`
//! maps every retry of the same logical request to the same internal entity
//! id. The mapping is established atomically: two concurrent first-requests
//! for the same key must converge on a single id.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;

use paycore_core::{EntityId, EntityKind, ExternalId, PartyId};

/// Dedup key for an idempotent create request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub kind: EntityKind,
    pub owner: PartyId,
    pub external_id: ExternalId,
}

impl IdempotencyKey {
    pub fn new(kind: EntityKind, owner: PartyId, external_id: ExternalId) -> Self {
        Self {
            kind,
            owner,
            external_id,
        }
    }
}

/// Idempotency mapping error.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// Transient backend contention; safe to retry.
    #[error("idempotency store contention: {0}")]
    Contention(String),

    #[error("idempotency store failure: {0}")]
    Backend(String),
}

/// Atomic get-or-create mapping from dedup key to internal entity id.
pub trait IdempotencyStore: Send + Sync {
    /// Return the entity id mapped to `key`, minting and storing a new id
    /// via `mint` if the key is unseen. Atomic per key: concurrent callers
    /// with the same key observe the same id.
    fn get_or_create(
        &self,
        key: &IdempotencyKey,
        mint: &dyn Fn() -> EntityId,
    ) -> Result<EntityId, IdempotencyError>;
}

impl<S> IdempotencyStore for std::sync::Arc<S>
where
    S: IdempotencyStore + ?Sized,
{
    fn get_or_create(
        &self,
        key: &IdempotencyKey,
        mint: &dyn Fn() -> EntityId,
    ) -> Result<EntityId, IdempotencyError> {
        (**self).get_or_create(key, mint)
    }
}

/// In-memory idempotency store for tests/dev, with a fault injector for
/// exercising retry paths.
#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    mappings: Mutex<HashMap<IdempotencyKey, EntityId>>,
    failing_lookups: AtomicU32,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` lookups fail with a transient contention error.
    pub fn fail_next_lookups(&self, n: u32) {
        self.failing_lookups.store(n, Ordering::SeqCst);
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    fn get_or_create(
        &self,
        key: &IdempotencyKey,
        mint: &dyn Fn() -> EntityId,
    ) -> Result<EntityId, IdempotencyError> {
        let remaining = self.failing_lookups.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .failing_lookups
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(IdempotencyError::Contention(
                "injected lookup failure".to_string(),
            ));
        }

        let mut mappings = self
            .mappings
            .lock()
            .map_err(|_| IdempotencyError::Backend("lock poisoned".to_string()))?;
        Ok(*mappings.entry(key.clone()).or_insert_with(mint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(owner: PartyId) -> IdempotencyKey {
        IdempotencyKey::new(
            EntityKind::Wallet,
            owner,
            ExternalId::new("ext-1").unwrap(),
        )
    }

    #[test]
    fn same_key_maps_to_same_id() {
        let store = InMemoryIdempotencyStore::new();
        let owner = PartyId::new();
        let first = store.get_or_create(&key(owner), &EntityId::new).unwrap();
        let second = store.get_or_create(&key(owner), &EntityId::new).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn keys_differ_by_kind_owner_and_external_id() {
        let store = InMemoryIdempotencyStore::new();
        let owner = PartyId::new();
        let wallet_id = store.get_or_create(&key(owner), &EntityId::new).unwrap();

        let instrument_key = IdempotencyKey::new(
            EntityKind::Instrument,
            owner,
            ExternalId::new("ext-1").unwrap(),
        );
        let other_owner_key = key(PartyId::new());
        let instrument_id = store
            .get_or_create(&instrument_key, &EntityId::new)
            .unwrap();
        let other_owner_id = store
            .get_or_create(&other_owner_key, &EntityId::new)
            .unwrap();

        assert_ne!(wallet_id, instrument_id);
        assert_ne!(wallet_id, other_owner_id);
    }

    #[test]
    fn injected_failure_then_recovery() {
        let store = InMemoryIdempotencyStore::new();
        store.fail_next_lookups(1);
        let owner = PartyId::new();
        assert!(matches!(
            store.get_or_create(&key(owner), &EntityId::new),
            Err(IdempotencyError::Contention(_))
        ));
        assert!(store.get_or_create(&key(owner), &EntityId::new).is_ok());
    }
}
