use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use paycore_core::{CurrencyCode, DomainError, EntityId};
use paycore_events::{Event, MigrationChain};

/// Schema version account events are currently written at.
///
/// The account stream versions independently from its parent aggregate; its
/// chain is verified even while empty so a future bump cannot silently skip
/// the gap check.
pub const ACCOUNT_SCHEMA_VERSION: u32 = 1;

/// Event: account opened for an identity/currency pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub identity: EntityId,
    pub currency: CurrencyCode,
    pub occurred_at: DateTime<Utc>,
}

/// Event: funds credited (positive amount in minor units).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsCredited {
    pub amount_minor: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: funds debited (positive amount in minor units).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundsDebited {
    pub amount_minor: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEvent {
    Opened(AccountOpened),
    Credited(FundsCredited),
    Debited(FundsDebited),
}

impl Event for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::Opened(_) => "account.opened",
            AccountEvent::Credited(_) => "account.credited",
            AccountEvent::Debited(_) => "account.debited",
        }
    }

    fn version(&self) -> u32 {
        ACCOUNT_SCHEMA_VERSION
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AccountEvent::Opened(e) => e.occurred_at,
            AccountEvent::Credited(e) => e.occurred_at,
            AccountEvent::Debited(e) => e.occurred_at,
        }
    }
}

/// Ledger-account sub-aggregate: an identity/currency pair plus a balance in
/// minor units, folded from its own event stream under the parent aggregate.
///
/// Supports interleaved legacy streams: account events observed before an
/// `Opened` marker (or before the parent's creation event) still fold — the
/// parent lazily initializes a [`LedgerAccount::shell`] and forwards into it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerAccount {
    identity: Option<EntityId>,
    currency: Option<CurrencyCode>,
    balance_minor: i64,
    opened: bool,
    version: u64,
}

impl LedgerAccount {
    /// Empty shell for rehydration and for lazy initialization by parents.
    pub fn shell() -> Self {
        Self::default()
    }

    pub fn identity(&self) -> Option<EntityId> {
        self.identity
    }

    pub fn currency(&self) -> Option<&CurrencyCode> {
        self.currency.as_ref()
    }

    /// Current balance in minor units (e.g. cents).
    pub fn balance_minor(&self) -> i64 {
        self.balance_minor
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Migration chain for account events (own versioning, independent of
    /// the embedding parent).
    pub fn migrations() -> MigrationChain {
        MigrationChain::unversioned()
    }

    /// One step of the account's own fold.
    ///
    /// Deterministic; tolerates `Credited`/`Debited` before `Opened` so
    /// legacy interleaved streams replay without crashing.
    pub fn apply(&mut self, event: &AccountEvent) {
        match event {
            AccountEvent::Opened(e) => {
                self.identity = Some(e.identity);
                self.currency = Some(e.currency.clone());
                self.opened = true;
            }
            AccountEvent::Credited(e) => {
                self.balance_minor = self.balance_minor.saturating_add(e.amount_minor);
            }
            AccountEvent::Debited(e) => {
                self.balance_minor = self.balance_minor.saturating_sub(e.amount_minor);
            }
        }

        self.version += 1;
    }

    /// Decide the opening event for a fresh account.
    pub fn open(
        identity: EntityId,
        currency: CurrencyCode,
        occurred_at: DateTime<Utc>,
    ) -> AccountEvent {
        AccountEvent::Opened(AccountOpened {
            identity,
            currency,
            occurred_at,
        })
    }

    /// Decide a credit. Rejects non-positive amounts and credits to an
    /// account that was never opened.
    pub fn credit(
        &self,
        amount_minor: i64,
        occurred_at: DateTime<Utc>,
    ) -> Result<AccountEvent, DomainError> {
        self.ensure_open()?;
        if amount_minor <= 0 {
            return Err(DomainError::validation("credit amount must be positive"));
        }
        Ok(AccountEvent::Credited(FundsCredited {
            amount_minor,
            occurred_at,
        }))
    }

    /// Decide a debit. Rejects non-positive amounts, unopened accounts and
    /// debits that would take the balance below zero.
    pub fn debit(
        &self,
        amount_minor: i64,
        occurred_at: DateTime<Utc>,
    ) -> Result<AccountEvent, DomainError> {
        self.ensure_open()?;
        if amount_minor <= 0 {
            return Err(DomainError::validation("debit amount must be positive"));
        }
        if self.balance_minor < amount_minor {
            return Err(DomainError::invariant("debit exceeds available balance"));
        }
        Ok(AccountEvent::Debited(FundsDebited {
            amount_minor,
            occurred_at,
        }))
    }

    fn ensure_open(&self) -> Result<(), DomainError> {
        if !self.opened {
            return Err(DomainError::invariant("account has not been opened"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_identity() -> EntityId {
        EntityId::new()
    }

    fn usd() -> CurrencyCode {
        CurrencyCode::new("USD").unwrap()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn open_then_credit_and_debit_folds_balance() {
        let mut account = LedgerAccount::shell();
        let identity = test_identity();

        account.apply(&LedgerAccount::open(identity, usd(), test_time()));
        assert!(account.is_open());
        assert_eq!(account.identity(), Some(identity));

        let credit = account.credit(1_000, test_time()).unwrap();
        account.apply(&credit);
        assert_eq!(account.balance_minor(), 1_000);

        let debit = account.debit(400, test_time()).unwrap();
        account.apply(&debit);
        assert_eq!(account.balance_minor(), 600);
        assert_eq!(account.version(), 3);
    }

    #[test]
    fn debit_exceeding_balance_is_rejected() {
        let mut account = LedgerAccount::shell();
        account.apply(&LedgerAccount::open(test_identity(), usd(), test_time()));

        let err = account.debit(1, test_time()).unwrap_err();
        match err {
            DomainError::InvariantViolation(_) => {}
            _ => panic!("Expected invariant violation for overdrawn debit"),
        }
    }

    #[test]
    fn credit_on_unopened_account_is_rejected() {
        let account = LedgerAccount::shell();
        let err = account.credit(100, test_time()).unwrap_err();
        match err {
            DomainError::InvariantViolation(_) => {}
            _ => panic!("Expected invariant violation for unopened account"),
        }
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let mut account = LedgerAccount::shell();
        account.apply(&LedgerAccount::open(test_identity(), usd(), test_time()));

        assert!(account.credit(0, test_time()).is_err());
        assert!(account.credit(-5, test_time()).is_err());
        assert!(account.debit(0, test_time()).is_err());
    }

    #[test]
    fn legacy_balance_events_before_open_do_not_crash() {
        // Interleaved legacy streams may carry balance events before the
        // opening marker; folding must tolerate them.
        let mut account = LedgerAccount::shell();
        account.apply(&AccountEvent::Credited(FundsCredited {
            amount_minor: 250,
            occurred_at: test_time(),
        }));
        assert!(!account.is_open());
        assert_eq!(account.balance_minor(), 250);

        account.apply(&LedgerAccount::open(test_identity(), usd(), test_time()));
        assert!(account.is_open());
        assert_eq!(account.balance_minor(), 250);
    }

    #[test]
    fn account_migration_chain_is_complete() {
        assert!(LedgerAccount::migrations().verify().is_ok());
        assert_eq!(
            LedgerAccount::migrations().current_version(),
            ACCOUNT_SCHEMA_VERSION
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: folding the same event sequence twice yields identical
        /// state, and the balance equals credits minus debits.
        #[test]
        fn fold_is_deterministic_and_balance_matches_ledger(
            amounts in prop::collection::vec(1i64..100_000i64, 1..20)
        ) {
            let identity = test_identity();
            let mut events = vec![LedgerAccount::open(identity, usd(), test_time())];

            let mut state = LedgerAccount::shell();
            state.apply(&events[0]);
            let mut expected: i64 = 0;

            for (i, amount) in amounts.iter().enumerate() {
                // Alternate credits and (covered) debits.
                let event = if i % 2 == 0 {
                    state.credit(*amount, test_time()).unwrap()
                } else if state.balance_minor() >= *amount {
                    state.debit(*amount, test_time()).unwrap()
                } else {
                    state.credit(*amount, test_time()).unwrap()
                };
                match &event {
                    AccountEvent::Credited(e) => expected += e.amount_minor,
                    AccountEvent::Debited(e) => expected -= e.amount_minor,
                    AccountEvent::Opened(_) => {}
                }
                state.apply(&event);
                events.push(event);
            }

            let mut replayed = LedgerAccount::shell();
            for event in &events {
                replayed.apply(event);
            }
            let mut replayed_again = LedgerAccount::shell();
            for event in &events {
                replayed_again.apply(event);
            }

            prop_assert_eq!(&replayed, &replayed_again);
            prop_assert_eq!(replayed.balance_minor(), expected);
            prop_assert_eq!(replayed.version(), events.len() as u64);
        }
    }
}
