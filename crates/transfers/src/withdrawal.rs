use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use paycore_core::{
    Aggregate, AggregateRoot, CurrencyCode, DomainError, EntityId, EntityKind, EntityStatus,
    ExternalId, Metadata, PartyId, ReferenceKind, ReferenceLookups,
};
use paycore_events::{CreatableEntity, Event, MigrationChain, StatusChanged};

/// Withdrawal identifier (aggregate id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WithdrawalId(pub EntityId);

impl WithdrawalId {
    pub fn new(id: EntityId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for WithdrawalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Create-request parameters for a withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalParams {
    pub wallet: EntityId,
    pub amount_minor: i64,
    pub currency: CurrencyCode,
    pub external_id: Option<ExternalId>,
    pub metadata: Metadata,
}

/// Aggregate root: Withdrawal.
///
/// Records an intent to move funds out of a wallet. Created unauthorized;
/// execution is gated on a later authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdrawal {
    id: WithdrawalId,
    owner: Option<PartyId>,
    wallet: Option<EntityId>,
    amount_minor: i64,
    currency: Option<CurrencyCode>,
    status: EntityStatus,
    created_at: Option<DateTime<Utc>>,
    external_id: Option<ExternalId>,
    metadata: Metadata,
    version: u64,
    created: bool,
}

impl Withdrawal {
    /// Empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: WithdrawalId) -> Self {
        Self {
            id,
            owner: None,
            wallet: None,
            amount_minor: 0,
            currency: None,
            status: EntityStatus::Unauthorized,
            created_at: None,
            external_id: None,
            metadata: Metadata::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> WithdrawalId {
        self.id
    }

    pub fn owner(&self) -> Option<PartyId> {
        self.owner
    }

    pub fn wallet(&self) -> Option<EntityId> {
        self.wallet
    }

    pub fn amount_minor(&self) -> i64 {
        self.amount_minor
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
}

impl AggregateRoot for Withdrawal {
    type Id = WithdrawalId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateWithdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateWithdrawal {
    pub withdrawal_id: WithdrawalId,
    pub owner: PartyId,
    pub wallet: EntityId,
    pub amount_minor: i64,
    pub currency: CurrencyCode,
    pub external_id: Option<ExternalId>,
    pub metadata: Metadata,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AuthorizeWithdrawal (idempotent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizeWithdrawal {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalCommand {
    CreateWithdrawal(CreateWithdrawal),
    AuthorizeWithdrawal(AuthorizeWithdrawal),
}

/// Event: WithdrawalCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalCreated {
    pub withdrawal_id: WithdrawalId,
    pub owner: PartyId,
    pub wallet: EntityId,
    pub amount_minor: i64,
    pub currency: CurrencyCode,
    pub external_id: Option<ExternalId>,
    pub metadata: Metadata,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalEvent {
    Created(WithdrawalCreated),
    StatusChanged(StatusChanged),
}

impl Event for WithdrawalEvent {
    fn event_type(&self) -> &'static str {
        match self {
            WithdrawalEvent::Created(_) => "withdrawal.created",
            WithdrawalEvent::StatusChanged(_) => "withdrawal.status_changed",
        }
    }

    fn version(&self) -> u32 {
        Withdrawal::SCHEMA_VERSION
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            WithdrawalEvent::Created(e) => e.occurred_at,
            WithdrawalEvent::StatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Withdrawal {
    type Command = WithdrawalCommand;
    type Event = WithdrawalEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            WithdrawalEvent::Created(e) => {
                self.id = e.withdrawal_id;
                self.owner = Some(e.owner);
                self.wallet = Some(e.wallet);
                self.amount_minor = e.amount_minor;
                self.currency = Some(e.currency.clone());
                self.status = EntityStatus::Unauthorized;
                self.created_at = Some(e.occurred_at);
                self.external_id = e.external_id.clone();
                self.metadata = e.metadata.clone();
                self.created = true;
            }
            WithdrawalEvent::StatusChanged(e) => {
                self.status = self.status.advance_to(e.status);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            WithdrawalCommand::CreateWithdrawal(cmd) => self.handle_create(cmd),
            WithdrawalCommand::AuthorizeWithdrawal(cmd) => self.handle_authorize(cmd),
        }
    }
}

impl Withdrawal {
    fn handle_create(&self, cmd: &CreateWithdrawal) -> Result<Vec<WithdrawalEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("withdrawal already exists"));
        }
        if cmd.amount_minor <= 0 {
            return Err(DomainError::validation("amount must be positive"));
        }

        Ok(vec![WithdrawalEvent::Created(WithdrawalCreated {
            withdrawal_id: cmd.withdrawal_id,
            owner: cmd.owner,
            wallet: cmd.wallet,
            amount_minor: cmd.amount_minor,
            currency: cmd.currency.clone(),
            external_id: cmd.external_id.clone(),
            metadata: cmd.metadata.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_authorize(
        &self,
        cmd: &AuthorizeWithdrawal,
    ) -> Result<Vec<WithdrawalEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.status.is_authorized() {
            return Ok(vec![]);
        }
        Ok(vec![WithdrawalEvent::StatusChanged(StatusChanged {
            status: EntityStatus::Authorized,
            occurred_at: cmd.occurred_at,
        })])
    }
}

impl CreatableEntity for Withdrawal {
    const KIND: EntityKind = EntityKind::Withdrawal;
    const SCHEMA_VERSION: u32 = 1;

    type Params = WithdrawalParams;

    fn empty(id: EntityId) -> Self {
        Withdrawal::empty(WithdrawalId::new(id))
    }

    fn created(&self) -> bool {
        self.created
    }

    fn external_id(params: &Self::Params) -> Option<&ExternalId> {
        params.external_id.as_ref()
    }

    fn migrations() -> MigrationChain {
        MigrationChain::unversioned()
    }

    fn validate_references(
        owner: PartyId,
        params: &Self::Params,
        refs: &dyn ReferenceLookups,
    ) -> Result<(), DomainError> {
        if !refs.wallet_exists(owner, params.wallet) {
            return Err(DomainError::reference_not_found(ReferenceKind::Wallet));
        }
        if !refs.currency_known(&params.currency) {
            return Err(DomainError::reference_not_found(ReferenceKind::Currency));
        }
        Ok(())
    }

    fn matches_replay(&self, params: &Self::Params) -> bool {
        self.wallet == Some(params.wallet)
            && self.amount_minor == params.amount_minor
            && self.currency.as_ref() == Some(&params.currency)
    }

    fn creation_events(
        id: EntityId,
        owner: PartyId,
        params: &Self::Params,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<Self::Event>, DomainError> {
        let shell = Withdrawal::empty(WithdrawalId::new(id));
        shell.handle(&WithdrawalCommand::CreateWithdrawal(CreateWithdrawal {
            withdrawal_id: WithdrawalId::new(id),
            owner,
            wallet: params.wallet,
            amount_minor: params.amount_minor,
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
        self.handle(&WithdrawalCommand::AuthorizeWithdrawal(
            AuthorizeWithdrawal { occurred_at },
        ))
    }
}
