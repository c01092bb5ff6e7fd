//! `paycore-core` — domain foundation for the account/ledger core.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the aggregate/fold contract, the status lifecycle, value
//! objects and the abstract reference-lookup collaborators.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod lookup;
pub mod status;
pub mod value_object;

pub use aggregate::{fold, Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::EntityKind;
pub use error::{DomainError, DomainResult, ReferenceKind};
pub use id::{EntityId, PartyId};
pub use lookup::{IdentityAccess, ReferenceLookups};
pub use status::EntityStatus;
pub use value_object::{CurrencyCode, ExternalId, Metadata};
