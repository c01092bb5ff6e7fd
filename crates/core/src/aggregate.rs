//! Aggregate root trait for event-sourced domain models.

use crate::error::{DomainError, DomainResult};

/// Aggregate root marker + minimal interface.
///
/// Intentionally small so each entity module can decide how it models state
/// transitions without bringing in any infrastructure concerns.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// Corresponds to the number of events applied (the stream revision).
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for an aggregate stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (idempotent commands, backfills).
    Any,
    /// Require the stream to be at an exact version. `Exact(0)` expresses
    /// "this aggregate must not exist yet" — the creation append.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

/// Aggregate execution semantics (pure, deterministic).
///
/// - **Decision logic**: `handle(&self, cmd)` returns events.
/// - **State evolution**: `apply(&mut self, event)` is one step of the left
///   fold over the (already-migrated) event sequence.
///
/// Aggregates must not perform IO or side effects: no wall clock, no
/// randomness inside `apply`. The same event sequence always yields the same
/// state, and state fields are only ever set through events.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Evolve in-memory state from a single event.
    ///
    /// Implementations must be deterministic and bump `version()` by one per
    /// applied event. A creation event is only valid as the first event of a
    /// stream; a status event replayed against a state it has already reached
    /// is a no-op, not an error.
    fn apply(&mut self, event: &Self::Event);

    /// Decide which events to emit given the current state and a command.
    ///
    /// Must not mutate state. State evolution is done through `apply`.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

/// Strict left fold: replay an ordered event sequence into a current state.
///
/// Inherently sequential within one aggregate; safely parallelizable across
/// different aggregate ids.
pub fn fold<A, I>(mut aggregate: A, events: I) -> A
where
    A: Aggregate,
    I: IntoIterator<Item = A::Event>,
{
    for event in events {
        aggregate.apply(&event);
    }
    aggregate
}
