//! Abstract reference-lookup collaborators.
//!
//! Create-time validation consults external stores (identity store, currency
//! catalog, wallet directory). The core only depends on this trait; concrete
//! backends live outside the domain layer.

use crate::id::{EntityId, PartyId};
use crate::value_object::CurrencyCode;

/// Result of probing an identity referenced by create params.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityAccess {
    /// Exists and is usable by the requesting owner.
    Accessible,
    /// Exists but is not usable (e.g. party access revoked).
    Inaccessible(String),
    /// No such identity.
    NotFound,
}

/// Synchronous facade over the entity lookup collaborators.
///
/// Implementations must be side-effect free on the lookup path; the core
/// calls these during create validation only and never caches results.
pub trait ReferenceLookups: Send + Sync {
    /// Probe an identity for existence and owner accessibility.
    fn identity_access(&self, owner: PartyId, identity: EntityId) -> IdentityAccess;

    /// Whether the provider code is registered.
    fn provider_known(&self, provider: &str) -> bool;

    /// Whether the currency is a known code.
    fn currency_known(&self, currency: &CurrencyCode) -> bool;

    /// Whether the wallet exists under this owner.
    fn wallet_exists(&self, owner: PartyId, wallet: EntityId) -> bool;
}
