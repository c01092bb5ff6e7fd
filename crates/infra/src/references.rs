//! In-memory reference-lookup collaborators for tests/dev.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use paycore_core::{CurrencyCode, EntityId, IdentityAccess, PartyId, ReferenceLookups};
use paycore_events::{MigrationContext, MigrationContextProvider};

#[derive(Debug, Clone)]
struct IdentityEntry {
    owner: PartyId,
    revoked_reason: Option<String>,
}

/// In-memory registry of providers, identities, currencies and wallets.
#[derive(Debug, Default)]
pub struct InMemoryReferences {
    providers: RwLock<HashSet<String>>,
    identities: RwLock<HashMap<EntityId, IdentityEntry>>,
    currencies: RwLock<HashSet<String>>,
    wallets: RwLock<HashMap<EntityId, PartyId>>,
}

impl InMemoryReferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_provider(&self, provider: impl Into<String>) {
        if let Ok(mut providers) = self.providers.write() {
            providers.insert(provider.into());
        }
    }

    pub fn register_identity(&self, owner: PartyId, identity: EntityId) {
        if let Ok(mut identities) = self.identities.write() {
            identities.insert(
                identity,
                IdentityEntry {
                    owner,
                    revoked_reason: None,
                },
            );
        }
    }

    /// Mark an identity as existing but unusable (e.g. party access revoked).
    pub fn revoke_identity(&self, identity: EntityId, reason: impl Into<String>) {
        if let Ok(mut identities) = self.identities.write() {
            if let Some(entry) = identities.get_mut(&identity) {
                entry.revoked_reason = Some(reason.into());
            }
        }
    }

    pub fn register_currency(&self, currency: &CurrencyCode) {
        if let Ok(mut currencies) = self.currencies.write() {
            currencies.insert(currency.as_str().to_string());
        }
    }

    pub fn register_wallet(&self, owner: PartyId, wallet: EntityId) {
        if let Ok(mut wallets) = self.wallets.write() {
            wallets.insert(wallet, owner);
        }
    }
}

impl ReferenceLookups for InMemoryReferences {
    fn identity_access(&self, owner: PartyId, identity: EntityId) -> IdentityAccess {
        let identities = match self.identities.read() {
            Ok(identities) => identities,
            Err(_) => return IdentityAccess::NotFound,
        };
        match identities.get(&identity) {
            None => IdentityAccess::NotFound,
            Some(entry) => {
                if let Some(reason) = &entry.revoked_reason {
                    IdentityAccess::Inaccessible(reason.clone())
                } else if entry.owner != owner {
                    IdentityAccess::Inaccessible("identity belongs to another party".to_string())
                } else {
                    IdentityAccess::Accessible
                }
            }
        }
    }

    fn provider_known(&self, provider: &str) -> bool {
        self.providers
            .read()
            .map(|providers| providers.contains(provider))
            .unwrap_or(false)
    }

    fn currency_known(&self, currency: &CurrencyCode) -> bool {
        self.currencies
            .read()
            .map(|currencies| currencies.contains(currency.as_str()))
            .unwrap_or(false)
    }

    fn wallet_exists(&self, owner: PartyId, wallet: EntityId) -> bool {
        self.wallets
            .read()
            .map(|wallets| wallets.get(&wallet) == Some(&owner))
            .unwrap_or(false)
    }
}

/// Provider returning the same migration context for every aggregate.
///
/// Real deployments derive `created_fallback` from an external record of the
/// aggregate's creation time; tests and backfills pin one value.
#[derive(Debug, Clone)]
pub struct FixedMigrationContext {
    context: MigrationContext,
}

impl FixedMigrationContext {
    pub fn new(context: MigrationContext) -> Self {
        Self { context }
    }
}

impl MigrationContextProvider for FixedMigrationContext {
    fn context_for(&self, _entity_id: EntityId) -> MigrationContext {
        self.context.clone()
    }
}
