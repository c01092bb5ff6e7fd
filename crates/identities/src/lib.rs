//! Identities domain module (event-sourced).
//!
//! An identity is a verified link between an owning party and an external
//! provider. Pure domain logic only: no IO, no HTTP, no storage concerns.

pub mod identity;

pub use identity::{
    AuthorizeIdentity, CreateIdentity, Identity, IdentityCommand, IdentityCreated, IdentityEvent,
    IdentityId, IdentityParams,
};
