use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use paycore_core::{
    Aggregate, AggregateRoot, CurrencyCode, DomainError, EntityId, EntityKind, EntityStatus,
    ExternalId, Metadata, PartyId, ReferenceKind, ReferenceLookups,
};
use paycore_events::{CreatableEntity, Event, MigrationChain, StatusChanged};

/// Transfer identifier (aggregate id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(pub EntityId);

impl TransferId {
    pub fn new(id: EntityId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for TransferId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Create-request parameters for a wallet-to-wallet transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferParams {
    pub source_wallet: EntityId,
    pub destination_wallet: EntityId,
    pub amount_minor: i64,
    pub currency: CurrencyCode,
    pub external_id: Option<ExternalId>,
    pub metadata: Metadata,
}

/// Aggregate root: Transfer.
///
/// Records an intent to move funds between two wallets. Created
/// unauthorized; execution is gated on a later authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    id: TransferId,
    owner: Option<PartyId>,
    source_wallet: Option<EntityId>,
    destination_wallet: Option<EntityId>,
    amount_minor: i64,
    currency: Option<CurrencyCode>,
    status: EntityStatus,
    created_at: Option<DateTime<Utc>>,
    external_id: Option<ExternalId>,
    metadata: Metadata,
    version: u64,
    created: bool,
}

impl Transfer {
    /// Empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: TransferId) -> Self {
        Self {
            id,
            owner: None,
            source_wallet: None,
            destination_wallet: None,
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

    pub fn id_typed(&self) -> TransferId {
        self.id
    }

    pub fn owner(&self) -> Option<PartyId> {
        self.owner
    }

    pub fn source_wallet(&self) -> Option<EntityId> {
        self.source_wallet
    }

    pub fn destination_wallet(&self) -> Option<EntityId> {
        self.destination_wallet
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

impl AggregateRoot for Transfer {
    type Id = TransferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransfer {
    pub transfer_id: TransferId,
    pub owner: PartyId,
    pub source_wallet: EntityId,
    pub destination_wallet: EntityId,
    pub amount_minor: i64,
    pub currency: CurrencyCode,
    pub external_id: Option<ExternalId>,
    pub metadata: Metadata,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AuthorizeTransfer (idempotent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizeTransfer {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferCommand {
    CreateTransfer(CreateTransfer),
    AuthorizeTransfer(AuthorizeTransfer),
}

/// Event: TransferCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCreated {
    pub transfer_id: TransferId,
    pub owner: PartyId,
    pub source_wallet: EntityId,
    pub destination_wallet: EntityId,
    pub amount_minor: i64,
    pub currency: CurrencyCode,
    pub external_id: Option<ExternalId>,
    pub metadata: Metadata,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferEvent {
    Created(TransferCreated),
    StatusChanged(StatusChanged),
}

impl Event for TransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::Created(_) => "transfer.created",
            TransferEvent::StatusChanged(_) => "transfer.status_changed",
        }
    }

    fn version(&self) -> u32 {
        Transfer::SCHEMA_VERSION
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransferEvent::Created(e) => e.occurred_at,
            TransferEvent::StatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Transfer {
    type Command = TransferCommand;
    type Event = TransferEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransferEvent::Created(e) => {
                self.id = e.transfer_id;
                self.owner = Some(e.owner);
                self.source_wallet = Some(e.source_wallet);
                self.destination_wallet = Some(e.destination_wallet);
                self.amount_minor = e.amount_minor;
                self.currency = Some(e.currency.clone());
                self.status = EntityStatus::Unauthorized;
                self.created_at = Some(e.occurred_at);
                self.external_id = e.external_id.clone();
                self.metadata = e.metadata.clone();
                self.created = true;
            }
            TransferEvent::StatusChanged(e) => {
                self.status = self.status.advance_to(e.status);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TransferCommand::CreateTransfer(cmd) => self.handle_create(cmd),
            TransferCommand::AuthorizeTransfer(cmd) => self.handle_authorize(cmd),
        }
    }
}

impl Transfer {
    fn handle_create(&self, cmd: &CreateTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("transfer already exists"));
        }
        if cmd.amount_minor <= 0 {
            return Err(DomainError::validation("amount must be positive"));
        }
        if cmd.source_wallet == cmd.destination_wallet {
            return Err(DomainError::validation(
                "source and destination wallets must differ",
            ));
        }

        Ok(vec![TransferEvent::Created(TransferCreated {
            transfer_id: cmd.transfer_id,
            owner: cmd.owner,
            source_wallet: cmd.source_wallet,
            destination_wallet: cmd.destination_wallet,
            amount_minor: cmd.amount_minor,
            currency: cmd.currency.clone(),
            external_id: cmd.external_id.clone(),
            metadata: cmd.metadata.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_authorize(&self, cmd: &AuthorizeTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.status.is_authorized() {
            return Ok(vec![]);
        }
        Ok(vec![TransferEvent::StatusChanged(StatusChanged {
            status: EntityStatus::Authorized,
            occurred_at: cmd.occurred_at,
        })])
    }
}

impl CreatableEntity for Transfer {
    const KIND: EntityKind = EntityKind::Transfer;
    const SCHEMA_VERSION: u32 = 1;

    type Params = TransferParams;

    fn empty(id: EntityId) -> Self {
        Transfer::empty(TransferId::new(id))
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
        if !refs.wallet_exists(owner, params.source_wallet) {
            return Err(DomainError::reference_not_found(ReferenceKind::Wallet));
        }
        if !refs.wallet_exists(owner, params.destination_wallet) {
            return Err(DomainError::reference_not_found(ReferenceKind::Wallet));
        }
        if !refs.currency_known(&params.currency) {
            return Err(DomainError::reference_not_found(ReferenceKind::Currency));
        }
        Ok(())
    }

    fn matches_replay(&self, params: &Self::Params) -> bool {
        self.source_wallet == Some(params.source_wallet)
            && self.destination_wallet == Some(params.destination_wallet)
            && self.amount_minor == params.amount_minor
            && self.currency.as_ref() == Some(&params.currency)
    }

    fn creation_events(
        id: EntityId,
        owner: PartyId,
        params: &Self::Params,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<Self::Event>, DomainError> {
        let shell = Transfer::empty(TransferId::new(id));
        shell.handle(&TransferCommand::CreateTransfer(CreateTransfer {
            transfer_id: TransferId::new(id),
            owner,
            source_wallet: params.source_wallet,
            destination_wallet: params.destination_wallet,
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
        self.handle(&TransferCommand::AuthorizeTransfer(AuthorizeTransfer {
            occurred_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd() -> CurrencyCode {
        CurrencyCode::new("USD").unwrap()
    }

    fn create_cmd(
        transfer_id: TransferId,
        source: EntityId,
        destination: EntityId,
    ) -> CreateTransfer {
        CreateTransfer {
            transfer_id,
            owner: PartyId::new(),
            source_wallet: source,
            destination_wallet: destination,
            amount_minor: 10_000,
            currency: usd(),
            external_id: Some(ExternalId::new("tr-1").unwrap()),
            metadata: Metadata::new(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn create_emits_single_created_event_and_starts_unauthorized() {
        let transfer_id = TransferId::new(EntityId::new());
        let mut transfer = Transfer::empty(transfer_id);
        let events = transfer
            .handle(&TransferCommand::CreateTransfer(create_cmd(
                transfer_id,
                EntityId::new(),
                EntityId::new(),
            )))
            .unwrap();
        assert_eq!(events.len(), 1);
        for e in &events {
            transfer.apply(e);
        }
        assert!(transfer.created);
        assert_eq!(transfer.status(), EntityStatus::Unauthorized);
        assert_eq!(transfer.version(), 1);
    }

    #[test]
    fn create_rejects_same_source_and_destination() {
        let transfer_id = TransferId::new(EntityId::new());
        let transfer = Transfer::empty(transfer_id);
        let wallet = EntityId::new();
        let err = transfer
            .handle(&TransferCommand::CreateTransfer(create_cmd(
                transfer_id,
                wallet,
                wallet,
            )))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn create_rejects_non_positive_amount() {
        let transfer_id = TransferId::new(EntityId::new());
        let transfer = Transfer::empty(transfer_id);
        let mut cmd = create_cmd(transfer_id, EntityId::new(), EntityId::new());
        cmd.amount_minor = -1;
        let err = transfer
            .handle(&TransferCommand::CreateTransfer(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn authorize_advances_then_noops() {
        let transfer_id = TransferId::new(EntityId::new());
        let mut transfer = Transfer::empty(transfer_id);
        let events = transfer
            .handle(&TransferCommand::CreateTransfer(create_cmd(
                transfer_id,
                EntityId::new(),
                EntityId::new(),
            )))
            .unwrap();
        for e in &events {
            transfer.apply(e);
        }

        let first = transfer.authorize_events(Utc::now()).unwrap();
        assert_eq!(first.len(), 1);
        for e in &first {
            transfer.apply(e);
        }
        assert_eq!(transfer.status(), EntityStatus::Authorized);
        assert!(transfer.authorize_events(Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn matches_replay_compares_endpoints_amount_currency() {
        let transfer_id = TransferId::new(EntityId::new());
        let source = EntityId::new();
        let destination = EntityId::new();
        let mut transfer = Transfer::empty(transfer_id);
        let events = transfer
            .handle(&TransferCommand::CreateTransfer(create_cmd(
                transfer_id,
                source,
                destination,
            )))
            .unwrap();
        for e in &events {
            transfer.apply(e);
        }

        let replay = TransferParams {
            source_wallet: source,
            destination_wallet: destination,
            amount_minor: 10_000,
            currency: usd(),
            external_id: None,
            metadata: Metadata::new(),
        };
        assert!(transfer.matches_replay(&replay));

        let swapped = TransferParams {
            source_wallet: destination,
            destination_wallet: source,
            ..replay
        };
        assert!(!transfer.matches_replay(&swapped));
    }
}
