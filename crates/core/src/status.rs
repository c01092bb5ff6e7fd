//! Entity status lifecycle.

use serde::{Deserialize, Serialize};

/// Authorization status of an entity.
///
/// The lifecycle is one-directional: `Unauthorized -> Authorized`, terminal
/// at `Authorized`. Every aggregate folds a `StatusChanged` event by moving
/// forward only; replaying an authorization against an already-authorized
/// aggregate is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Unauthorized,
    Authorized,
}

impl EntityStatus {
    pub fn is_authorized(self) -> bool {
        self == EntityStatus::Authorized
    }

    /// Monotonic merge: never regress an already-authorized status.
    pub fn advance_to(self, next: EntityStatus) -> EntityStatus {
        match (self, next) {
            (EntityStatus::Authorized, _) => EntityStatus::Authorized,
            (EntityStatus::Unauthorized, next) => next,
        }
    }
}
