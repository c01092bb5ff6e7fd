//! `paycore-events` — event-sourcing toolkit for the account/ledger core.
//!
//! Events are the sole source of truth for aggregate state. This crate
//! defines the event contract, the owner-scoped envelope, the schema
//! migration chain that lifts legacy event payloads to the current version,
//! and the provisioning contract driving idempotent creation.

pub mod create;
pub mod envelope;
pub mod event;
pub mod migration;

pub use create::CreatableEntity;
pub use envelope::EventEnvelope;
pub use event::{Event, StatusChanged};
pub use migration::{
    MigrationChain, MigrationContext, MigrationContextProvider, MigrationError, MigrationStep,
};
