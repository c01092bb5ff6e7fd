//! Money-movement domain module (event-sourced).
//!
//! Two aggregates: withdrawals (funds leaving a wallet to the outside) and
//! transfers (funds moving between two wallets). Both are created
//! unauthorized and require explicit authorization before execution.
//! Pure domain logic only.

pub mod transfer;
pub mod withdrawal;

pub use transfer::{
    AuthorizeTransfer, CreateTransfer, Transfer, TransferCommand, TransferCreated, TransferEvent,
    TransferId, TransferParams,
};
pub use withdrawal::{
    AuthorizeWithdrawal, CreateWithdrawal, Withdrawal, WithdrawalCommand, WithdrawalCreated,
    WithdrawalEvent, WithdrawalId, WithdrawalParams,
};
