//! Ledger-account sub-aggregate (identity/currency pair + balance).
//!
//! Pure domain logic only: no IO, no persistence concerns. The account is
//! never a top-level aggregate — wallets and instruments embed it and forward
//! account-scoped events into its own fold.

pub mod account;

pub use account::{
    AccountEvent, AccountOpened, FundsCredited, FundsDebited, LedgerAccount,
    ACCOUNT_SCHEMA_VERSION,
};
