//! Event schema migration.
//!
//! Stored events carry the schema version they were written at. On read, a
//! per-entity-kind chain of version-specific transforms lifts each payload
//! `v1 -> v2 -> ... -> current` before deserialization. Each step is pure and
//! total over all previously-accepted payload shapes: historical data must
//! remain replayable forever, so a step never fails for valid legacy data.
//!
//! The chain is an explicit ordered list of `(from) -> from + 1` functions.
//! `verify()` asserts at construction/startup time that the list has no gaps
//! between 1 and the current version, so a missing step is caught before the
//! first legacy event is ever read. A gap detected while migrating is fatal
//! and must never be swallowed — skipping a legacy event corrupts historical
//! state.

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use paycore_core::EntityId;

/// Ambient values needed only while lifting legacy events.
///
/// Supplies data not present in the legacy event itself — e.g. an
/// externally-tracked creation timestamp for events that predate timestamp
/// tracking. Obtained from outside the log by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationContext {
    /// Creation timestamp to backfill into events written before the schema
    /// carried one.
    pub created_fallback: DateTime<Utc>,
}

/// Supplies a [`MigrationContext`] for a given aggregate.
///
/// The real provider is owned by the surrounding service; the core only
/// consumes the abstraction.
pub trait MigrationContextProvider: Send + Sync {
    fn context_for(&self, entity_id: EntityId) -> MigrationContext;
}

/// Failure while lifting an event payload.
///
/// `Gap` and `AboveCurrent` indicate a data/schema bug and are always fatal:
/// they must not be caught and converted into a generic error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MigrationError {
    #[error("no migration step defined from version {from}")]
    Gap { from: u32 },

    #[error("duplicate migration step from version {from}")]
    Duplicate { from: u32 },

    #[error("event declares version {declared} above current schema version {current}")]
    AboveCurrent { declared: u32, current: u32 },

    #[error("legacy payload rejected: {0}")]
    Payload(String),
}

type StepFn = Box<dyn Fn(&str, Value, &MigrationContext) -> Result<Value, MigrationError> + Send + Sync>;

/// One pure transform lifting a payload from version `from` to `from + 1`.
///
/// Steps receive the stored `event_type` tag: a step that only concerns one
/// payload shape (e.g. the creation event) passes other event types through
/// unchanged while still lifting their declared version.
pub struct MigrationStep {
    from: u32,
    lift: StepFn,
}

impl MigrationStep {
    pub fn new<F>(from: u32, lift: F) -> Self
    where
        F: Fn(&str, Value, &MigrationContext) -> Result<Value, MigrationError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            from,
            lift: Box::new(lift),
        }
    }

    pub fn from_version(&self) -> u32 {
        self.from
    }
}

impl core::fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MigrationStep")
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

/// Strictly ordered chain of migration steps up to the current version.
#[derive(Debug)]
pub struct MigrationChain {
    current: u32,
    steps: Vec<MigrationStep>,
}

impl MigrationChain {
    /// Build a chain targeting `current`. Call [`MigrationChain::verify`]
    /// once at startup to assert completeness.
    pub fn new(current: u32, mut steps: Vec<MigrationStep>) -> Self {
        steps.sort_by_key(|s| s.from);
        Self { current, steps }
    }

    /// Chain with no steps for a kind still at schema version 1.
    pub fn unversioned() -> Self {
        Self::new(1, Vec::new())
    }

    pub fn current_version(&self) -> u32 {
        self.current
    }

    /// Startup-time assertion: steps must cover every version in
    /// `1..current` exactly once.
    pub fn verify(&self) -> Result<(), MigrationError> {
        let mut expected = 1;
        for step in &self.steps {
            if step.from < expected {
                return Err(MigrationError::Duplicate { from: step.from });
            }
            if step.from > expected {
                return Err(MigrationError::Gap { from: expected });
            }
            expected += 1;
        }
        if expected != self.current {
            return Err(MigrationError::Gap { from: expected });
        }
        Ok(())
    }

    /// Lift `payload` from the version the stored event declares up to the
    /// current version. A no-op if already current.
    pub fn migrate(
        &self,
        event_type: &str,
        declared_version: u32,
        payload: Value,
        ctx: &MigrationContext,
    ) -> Result<Value, MigrationError> {
        if declared_version > self.current {
            return Err(MigrationError::AboveCurrent {
                declared: declared_version,
                current: self.current,
            });
        }

        let mut payload = payload;
        for from in declared_version..self.current {
            let step = self
                .steps
                .iter()
                .find(|s| s.from == from)
                .ok_or(MigrationError::Gap { from })?;
            payload = (step.lift)(event_type, payload, ctx)?;
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_ctx() -> MigrationContext {
        MigrationContext {
            created_fallback: Utc::now(),
        }
    }

    fn tag_step(from: u32) -> MigrationStep {
        MigrationStep::new(from, move |_, mut payload, _| {
            if let Some(obj) = payload.as_object_mut() {
                obj.insert(format!("v{}", from + 1), json!(true));
            }
            Ok(payload)
        })
    }

    #[test]
    fn verify_accepts_complete_chain() {
        let chain = MigrationChain::new(3, vec![tag_step(1), tag_step(2)]);
        assert!(chain.verify().is_ok());
    }

    #[test]
    fn verify_detects_gap() {
        let chain = MigrationChain::new(3, vec![tag_step(2)]);
        assert_eq!(chain.verify().unwrap_err(), MigrationError::Gap { from: 1 });
    }

    #[test]
    fn verify_detects_missing_tail() {
        let chain = MigrationChain::new(4, vec![tag_step(1), tag_step(2)]);
        assert_eq!(chain.verify().unwrap_err(), MigrationError::Gap { from: 3 });
    }

    #[test]
    fn verify_detects_duplicate() {
        let chain = MigrationChain::new(3, vec![tag_step(1), tag_step(1)]);
        assert_eq!(
            chain.verify().unwrap_err(),
            MigrationError::Duplicate { from: 1 }
        );
    }

    #[test]
    fn migrate_resumes_from_declared_version() {
        let chain = MigrationChain::new(3, vec![tag_step(1), tag_step(2)]);
        let ctx = test_ctx();

        let lifted = chain.migrate("x.created", 1, json!({}), &ctx).unwrap();
        assert_eq!(lifted, json!({"v2": true, "v3": true}));

        let lifted = chain.migrate("x.created", 2, json!({}), &ctx).unwrap();
        assert_eq!(lifted, json!({"v3": true}));
    }

    #[test]
    fn migrate_is_a_no_op_at_current_version() {
        let chain = MigrationChain::new(3, vec![tag_step(1), tag_step(2)]);
        let ctx = test_ctx();
        let payload = json!({"already": "current"});
        let lifted = chain
            .migrate("x.created", 3, payload.clone(), &ctx)
            .unwrap();
        assert_eq!(lifted, payload);
    }

    #[test]
    fn migrate_rejects_version_above_current() {
        let chain = MigrationChain::unversioned();
        let ctx = test_ctx();
        let err = chain.migrate("x.created", 2, json!({}), &ctx).unwrap_err();
        assert_eq!(
            err,
            MigrationError::AboveCurrent {
                declared: 2,
                current: 1
            }
        );
    }
}
