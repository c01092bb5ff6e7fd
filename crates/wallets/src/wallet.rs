use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use paycore_accounts::{AccountEvent, LedgerAccount};
use paycore_core::{
    Aggregate, AggregateRoot, CurrencyCode, DomainError, EntityId, EntityKind, EntityStatus,
    ExternalId, IdentityAccess, Metadata, PartyId, ReferenceKind, ReferenceLookups,
};
use paycore_events::{
    CreatableEntity, Event, MigrationChain, MigrationError, MigrationStep, StatusChanged,
};

/// Wallet identifier (aggregate id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(pub EntityId);

impl WalletId {
    pub fn new(id: EntityId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for WalletId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Create-request parameters for a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletParams {
    pub name: String,
    pub identity: EntityId,
    pub currency: CurrencyCode,
    pub external_id: Option<ExternalId>,
    pub metadata: Metadata,
}

/// Aggregate root: Wallet.
///
/// Embeds a [`LedgerAccount`] sub-aggregate; account-scoped events are
/// forwarded into its own fold, lazily initializing an empty shell when an
/// account event is observed first (legacy interleaved streams).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wallet {
    id: WalletId,
    owner: Option<PartyId>,
    name: String,
    identity: Option<EntityId>,
    currency: Option<CurrencyCode>,
    status: EntityStatus,
    created_at: Option<DateTime<Utc>>,
    external_id: Option<ExternalId>,
    metadata: Metadata,
    account: Option<LedgerAccount>,
    version: u64,
    created: bool,
}

impl Wallet {
    /// Empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: WalletId) -> Self {
        Self {
            id,
            owner: None,
            name: String::new(),
            identity: None,
            currency: None,
            status: EntityStatus::Unauthorized,
            created_at: None,
            external_id: None,
            metadata: Metadata::new(),
            account: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> WalletId {
        self.id
    }

    pub fn owner(&self) -> Option<PartyId> {
        self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> Option<EntityId> {
        self.identity
    }

    pub fn currency(&self) -> Option<&CurrencyCode> {
        self.currency.as_ref()
    }

    pub fn status(&self) -> EntityStatus {
        self.status
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn external_id(&self) -> Option<&ExternalId> {
        self.external_id.as_ref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn account(&self) -> Option<&LedgerAccount> {
        self.account.as_ref()
    }
}

impl AggregateRoot for Wallet {
    type Id = WalletId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateWallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateWallet {
    pub wallet_id: WalletId,
    pub owner: PartyId,
    pub name: String,
    pub identity: EntityId,
    pub currency: CurrencyCode,
    pub external_id: Option<ExternalId>,
    pub metadata: Metadata,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AuthorizeWallet (idempotent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizeWallet {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletCommand {
    CreateWallet(CreateWallet),
    AuthorizeWallet(AuthorizeWallet),
}

/// Event: WalletCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletCreated {
    pub wallet_id: WalletId,
    pub owner: PartyId,
    pub name: String,
    pub identity: EntityId,
    pub currency: CurrencyCode,
    pub external_id: Option<ExternalId>,
    pub metadata: Metadata,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletEvent {
    Created(WalletCreated),
    Account(AccountEvent),
    StatusChanged(StatusChanged),
}

impl Event for WalletEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WalletEvent::Created(_) => "wallet.created",
            // Account events keep the sub-aggregate's own type tags.
            WalletEvent::Account(e) => e.event_type(),
            WalletEvent::StatusChanged(_) => "wallet.status_changed",
        }
    }

    fn version(&self) -> u32 {
        match self {
            // Sub-aggregate events version independently.
            WalletEvent::Account(e) => e.version(),
            _ => Wallet::SCHEMA_VERSION,
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            WalletEvent::Created(e) => e.occurred_at,
            WalletEvent::Account(e) => e.occurred_at(),
            WalletEvent::StatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Wallet {
    type Command = WalletCommand;
    type Event = WalletEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            WalletEvent::Created(e) => {
                self.id = e.wallet_id;
                self.owner = Some(e.owner);
                self.name = e.name.clone();
                self.identity = Some(e.identity);
                self.currency = Some(e.currency.clone());
                self.status = EntityStatus::Unauthorized;
                self.created_at = Some(e.occurred_at);
                self.external_id = e.external_id.clone();
                self.metadata = e.metadata.clone();
                self.created = true;
            }
            WalletEvent::Account(e) => {
                // Lazy shell init: account events may be observed before the
                // parent's creation marker under legacy data.
                self.account.get_or_insert_with(LedgerAccount::shell).apply(e);
            }
            WalletEvent::StatusChanged(e) => {
                self.status = self.status.advance_to(e.status);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            WalletCommand::CreateWallet(cmd) => self.handle_create(cmd),
            WalletCommand::AuthorizeWallet(cmd) => self.handle_authorize(cmd),
        }
    }
}

impl Wallet {
    fn handle_create(&self, cmd: &CreateWallet) -> Result<Vec<WalletEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("wallet already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        Ok(vec![
            WalletEvent::Created(WalletCreated {
                wallet_id: cmd.wallet_id,
                owner: cmd.owner,
                name: cmd.name.clone(),
                identity: cmd.identity,
                currency: cmd.currency.clone(),
                external_id: cmd.external_id.clone(),
                metadata: cmd.metadata.clone(),
                occurred_at: cmd.occurred_at,
            }),
            WalletEvent::Account(LedgerAccount::open(
                cmd.identity,
                cmd.currency.clone(),
                cmd.occurred_at,
            )),
            WalletEvent::StatusChanged(StatusChanged {
                status: EntityStatus::Authorized,
                occurred_at: cmd.occurred_at,
            }),
        ])
    }

    fn handle_authorize(&self, cmd: &AuthorizeWallet) -> Result<Vec<WalletEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.status.is_authorized() {
            return Ok(vec![]);
        }
        Ok(vec![WalletEvent::StatusChanged(StatusChanged {
            status: EntityStatus::Authorized,
            occurred_at: cmd.occurred_at,
        })])
    }
}

impl CreatableEntity for Wallet {
    const KIND: EntityKind = EntityKind::Wallet;
    const SCHEMA_VERSION: u32 = 2;

    type Params = WalletParams;

    fn empty(id: EntityId) -> Self {
        Wallet::empty(WalletId::new(id))
    }

    fn created(&self) -> bool {
        self.created
    }

    fn external_id(params: &Self::Params) -> Option<&ExternalId> {
        params.external_id.as_ref()
    }

    fn migrations() -> MigrationChain {
        MigrationChain::new(
            Self::SCHEMA_VERSION,
            vec![
                // v1 -> v2: wallets written before timestamp tracking carry
                // no occurred_at; derive it from the migration context.
                MigrationStep::new(1, |event_type, mut payload, ctx| {
                    if event_type != "wallet.created" {
                        return Ok(payload);
                    }
                    let inner = payload
                        .get_mut("Created")
                        .and_then(Value::as_object_mut)
                        .ok_or_else(|| {
                            MigrationError::Payload(
                                "wallet.created payload is not a Created object".to_string(),
                            )
                        })?;
                    if !inner.contains_key("occurred_at") {
                        let fallback = serde_json::to_value(ctx.created_fallback)
                            .map_err(|e| MigrationError::Payload(e.to_string()))?;
                        inner.insert("occurred_at".to_string(), fallback);
                    }
                    Ok(payload)
                }),
            ],
        )
    }

    fn migrations_for(event_type: &str) -> MigrationChain {
        if event_type.starts_with("account.") {
            LedgerAccount::migrations()
        } else {
            Self::migrations()
        }
    }

    fn validate_references(
        owner: PartyId,
        params: &Self::Params,
        refs: &dyn ReferenceLookups,
    ) -> Result<(), DomainError> {
        match refs.identity_access(owner, params.identity) {
            IdentityAccess::Accessible => {}
            IdentityAccess::NotFound => {
                return Err(DomainError::reference_not_found(ReferenceKind::Identity));
            }
            IdentityAccess::Inaccessible(reason) => {
                return Err(DomainError::reference_inaccessible(
                    ReferenceKind::Identity,
                    reason,
                ));
            }
        }
        if !refs.currency_known(&params.currency) {
            return Err(DomainError::reference_not_found(ReferenceKind::Currency));
        }
        Ok(())
    }

    fn matches_replay(&self, params: &Self::Params) -> bool {
        self.name == params.name
            && self.identity == Some(params.identity)
            && self.currency.as_ref() == Some(&params.currency)
    }

    fn creation_events(
        id: EntityId,
        owner: PartyId,
        params: &Self::Params,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<Self::Event>, DomainError> {
        let shell = Wallet::empty(WalletId::new(id));
        shell.handle(&WalletCommand::CreateWallet(CreateWallet {
            wallet_id: WalletId::new(id),
            owner,
            name: params.name.clone(),
            identity: params.identity,
            currency: params.currency.clone(),
            external_id: params.external_id.clone(),
            metadata: params.metadata.clone(),
            occurred_at,
        }))
    }

    fn authorize_events(
        &self,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<Self::Event>, DomainError> {
        self.handle(&WalletCommand::AuthorizeWallet(AuthorizeWallet {
            occurred_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paycore_events::MigrationContext;
    use serde_json::json;

    fn test_owner() -> PartyId {
        PartyId::new()
    }

    fn test_wallet_id() -> WalletId {
        WalletId::new(EntityId::new())
    }

    fn usd() -> CurrencyCode {
        CurrencyCode::new("USD").unwrap()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn create_cmd(wallet_id: WalletId, owner: PartyId, identity: EntityId) -> CreateWallet {
        CreateWallet {
            wallet_id,
            owner,
            name: "Spending".to_string(),
            identity,
            currency: usd(),
            external_id: Some(ExternalId::new("ext-1").unwrap()),
            metadata: Metadata::new(),
            occurred_at: test_time(),
        }
    }

    #[test]
    fn create_emits_created_account_opened_and_authorized() {
        let wallet_id = test_wallet_id();
        let owner = test_owner();
        let identity = EntityId::new();
        let wallet = Wallet::empty(wallet_id);

        let events = wallet
            .handle(&WalletCommand::CreateWallet(create_cmd(
                wallet_id, owner, identity,
            )))
            .unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], WalletEvent::Created(_)));
        assert!(matches!(
            events[1],
            WalletEvent::Account(AccountEvent::Opened(_))
        ));
        match &events[2] {
            WalletEvent::StatusChanged(e) => assert_eq!(e.status, EntityStatus::Authorized),
            _ => panic!("Expected StatusChanged last"),
        }
    }

    #[test]
    fn fold_materializes_embedded_account() {
        let wallet_id = test_wallet_id();
        let identity = EntityId::new();
        let mut wallet = Wallet::empty(wallet_id);

        let events = wallet
            .handle(&WalletCommand::CreateWallet(create_cmd(
                wallet_id,
                test_owner(),
                identity,
            )))
            .unwrap();
        for e in &events {
            wallet.apply(e);
        }

        assert!(wallet.created);
        assert_eq!(wallet.status(), EntityStatus::Authorized);
        let account = wallet.account().expect("account sub-aggregate present");
        assert!(account.is_open());
        assert_eq!(account.identity(), Some(identity));
        assert_eq!(account.balance_minor(), 0);
        assert_eq!(wallet.version(), 3);
    }

    #[test]
    fn account_event_before_creation_initializes_shell() {
        // Forward-compatible replay: legacy streams may interleave account
        // events before the parent's creation marker.
        let mut wallet = Wallet::empty(test_wallet_id());
        wallet.apply(&WalletEvent::Account(AccountEvent::Credited(
            paycore_accounts::FundsCredited {
                amount_minor: 500,
                occurred_at: test_time(),
            },
        )));

        assert!(!wallet.created);
        let account = wallet.account().expect("shell initialized lazily");
        assert_eq!(account.balance_minor(), 500);
    }

    #[test]
    fn fold_is_deterministic() {
        let wallet_id = test_wallet_id();
        let identity = EntityId::new();
        let shell = Wallet::empty(wallet_id);
        let events = shell
            .handle(&WalletCommand::CreateWallet(create_cmd(
                wallet_id,
                test_owner(),
                identity,
            )))
            .unwrap();

        let mut a = Wallet::empty(wallet_id);
        let mut b = Wallet::empty(wallet_id);
        for e in &events {
            a.apply(e);
            b.apply(e);
        }
        assert_eq!(a, b);
    }

    #[test]
    fn matches_replay_ignores_metadata_and_external_id() {
        let wallet_id = test_wallet_id();
        let identity = EntityId::new();
        let mut wallet = Wallet::empty(wallet_id);
        let events = wallet
            .handle(&WalletCommand::CreateWallet(create_cmd(
                wallet_id,
                test_owner(),
                identity,
            )))
            .unwrap();
        for e in &events {
            wallet.apply(e);
        }

        let replay = WalletParams {
            name: "Spending".to_string(),
            identity,
            currency: usd(),
            external_id: None,
            metadata: Metadata::new().with("retry", "true"),
        };
        assert!(wallet.matches_replay(&replay));

        let renamed = WalletParams {
            name: "Savings".to_string(),
            ..replay
        };
        assert!(!wallet.matches_replay(&renamed));
    }

    #[test]
    fn v1_created_event_gains_occurred_at_from_context() {
        let chain = <Wallet as CreatableEntity>::migrations();
        chain.verify().unwrap();

        let fallback = test_time();
        let ctx = MigrationContext {
            created_fallback: fallback,
        };
        let wallet_id = test_wallet_id();
        let owner = test_owner();
        let identity = EntityId::new();

        // v1 shape: no occurred_at on the created payload.
        let legacy = json!({
            "Created": {
                "wallet_id": wallet_id,
                "owner": owner,
                "name": "Spending",
                "identity": identity,
                "currency": "USD",
                "external_id": null,
                "metadata": {},
            }
        });

        let lifted = chain.migrate("wallet.created", 1, legacy, &ctx).unwrap();
        let event: WalletEvent = serde_json::from_value(lifted).unwrap();
        match event {
            WalletEvent::Created(e) => {
                assert_eq!(e.occurred_at, fallback);
                assert_eq!(e.name, "Spending");
            }
            _ => panic!("Expected Created event after migration"),
        }
    }

    #[test]
    fn migration_is_idempotent_at_current_version() {
        let chain = <Wallet as CreatableEntity>::migrations();
        let ctx = MigrationContext {
            created_fallback: test_time(),
        };
        let wallet_id = test_wallet_id();
        let shell = Wallet::empty(wallet_id);
        let events = shell
            .handle(&WalletCommand::CreateWallet(create_cmd(
                wallet_id,
                test_owner(),
                EntityId::new(),
            )))
            .unwrap();

        let payload = serde_json::to_value(&events[0]).unwrap();
        let once = chain
            .migrate("wallet.created", Wallet::SCHEMA_VERSION, payload.clone(), &ctx)
            .unwrap();
        assert_eq!(once, payload);
    }

    #[test]
    fn account_events_route_to_the_account_chain() {
        let chain = <Wallet as CreatableEntity>::migrations_for("account.opened");
        assert_eq!(
            chain.current_version(),
            paycore_accounts::ACCOUNT_SCHEMA_VERSION
        );
        assert!(chain.verify().is_ok());
    }
}
