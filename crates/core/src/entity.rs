//! Closed set of entity kinds handled by the core.

use serde::{Deserialize, Serialize};

/// Kind tag of a long-lived financial entity.
///
/// Closed enum with exhaustive matching: adding a kind without handling it
/// everywhere is a compile error, not a runtime gap. The stable string tag is
/// used both as the idempotency-key component and as the stream's
/// `aggregate_type`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Identity,
    Wallet,
    Instrument,
    Withdrawal,
    Transfer,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Identity => "identity",
            EntityKind::Wallet => "wallet",
            EntityKind::Instrument => "instrument",
            EntityKind::Withdrawal => "withdrawal",
            EntityKind::Transfer => "transfer",
        }
    }
}

impl core::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
