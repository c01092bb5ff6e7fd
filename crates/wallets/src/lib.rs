//! Wallets domain module (event-sourced).
//!
//! A wallet holds funds for one identity/currency pair. It embeds a
//! ledger-account sub-aggregate whose events are forwarded into the account's
//! own fold. Pure domain logic only.

pub mod wallet;

pub use wallet::{
    AuthorizeWallet, CreateWallet, Wallet, WalletCommand, WalletCreated, WalletEvent, WalletId,
    WalletParams,
};
