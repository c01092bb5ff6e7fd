use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use paycore_core::EntityStatus;

/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution; see [`crate::migration`])
/// - designed to be **append-only**
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "wallet.created").
    fn event_type(&self) -> &'static str;

    /// Schema version this event is written at. Stored alongside the payload
    /// so legacy events can be migrated forward on read.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}

/// Shared payload of the status-transition event emitted by every entity
/// kind.
///
/// Folding this event replaces `status` monotonically: an authorization
/// replayed against an already-authorized aggregate is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub status: EntityStatus,
    pub occurred_at: DateTime<Utc>,
}
