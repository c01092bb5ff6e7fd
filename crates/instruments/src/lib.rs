//! Payment-instruments domain module (event-sourced).
//!
//! An instrument is an external payment resource (card, bank account, token)
//! linked to an identity. Its event schema has evolved through four versions;
//! the migration chain in [`migrate`] lifts legacy events transparently on
//! read. Pure domain logic only.

pub mod instrument;
pub mod migrate;

pub use instrument::{
    AuthorizeInstrument, CreateInstrument, Instrument, InstrumentCommand, InstrumentCreated,
    InstrumentEvent, InstrumentId, InstrumentParams, InstrumentResource,
};
