use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use paycore_accounts::{AccountEvent, LedgerAccount};
use paycore_core::{
    Aggregate, AggregateRoot, CurrencyCode, DomainError, EntityId, EntityKind, EntityStatus,
    ExternalId, IdentityAccess, Metadata, PartyId, ReferenceKind, ReferenceLookups,
};
use paycore_events::{CreatableEntity, Event, MigrationChain, StatusChanged};

use crate::migrate;

/// Instrument identifier (aggregate id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(pub EntityId);

impl InstrumentId {
    pub fn new(id: EntityId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Description of the external payment resource an instrument points at:
/// a discriminating `kind` (card network, bank rail, token scheme) plus
/// provider-specific key/value fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentResource {
    pub kind: String,
    pub fields: BTreeMap<String, String>,
}

impl InstrumentResource {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Create-request parameters for a payment instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentParams {
    pub name: String,
    pub identity: EntityId,
    pub currency: CurrencyCode,
    pub resource: InstrumentResource,
    pub external_id: Option<ExternalId>,
    pub metadata: Metadata,
}

/// Aggregate root: payment Instrument.
///
/// Embeds a [`LedgerAccount`] sub-aggregate like wallets do. Instruments are
/// created unauthorized and require an explicit authorization step before use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrument {
    id: InstrumentId,
    owner: Option<PartyId>,
    name: String,
    identity: Option<EntityId>,
    currency: Option<CurrencyCode>,
    resource: Option<InstrumentResource>,
    status: EntityStatus,
    created_at: Option<DateTime<Utc>>,
    external_id: Option<ExternalId>,
    metadata: Metadata,
    account: Option<LedgerAccount>,
    version: u64,
    created: bool,
}

impl Instrument {
    /// Empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InstrumentId) -> Self {
        Self {
            id,
            owner: None,
            name: String::new(),
            identity: None,
            currency: None,
            resource: None,
            status: EntityStatus::Unauthorized,
            created_at: None,
            external_id: None,
            metadata: Metadata::new(),
            account: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InstrumentId {
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

    pub fn resource(&self) -> Option<&InstrumentResource> {
        self.resource.as_ref()
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

impl AggregateRoot for Instrument {
    type Id = InstrumentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateInstrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInstrument {
    pub instrument_id: InstrumentId,
    pub owner: PartyId,
    pub name: String,
    pub identity: EntityId,
    pub currency: CurrencyCode,
    pub resource: InstrumentResource,
    pub external_id: Option<ExternalId>,
    pub metadata: Metadata,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AuthorizeInstrument (idempotent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizeInstrument {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentCommand {
    CreateInstrument(CreateInstrument),
    AuthorizeInstrument(AuthorizeInstrument),
}

/// Event: InstrumentCreated (schema v4).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentCreated {
    pub instrument_id: InstrumentId,
    pub owner: PartyId,
    pub name: String,
    pub identity: EntityId,
    pub currency: CurrencyCode,
    pub resource: InstrumentResource,
    pub external_id: Option<ExternalId>,
    pub metadata: Metadata,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentEvent {
    Created(InstrumentCreated),
    Account(AccountEvent),
    StatusChanged(StatusChanged),
}

impl Event for InstrumentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InstrumentEvent::Created(_) => "instrument.created",
            // Account events keep the sub-aggregate's own type tags.
            InstrumentEvent::Account(e) => e.event_type(),
            InstrumentEvent::StatusChanged(_) => "instrument.status_changed",
        }
    }

    fn version(&self) -> u32 {
        match self {
            // Sub-aggregate events version independently.
            InstrumentEvent::Account(e) => e.version(),
            _ => Instrument::SCHEMA_VERSION,
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InstrumentEvent::Created(e) => e.occurred_at,
            InstrumentEvent::Account(e) => e.occurred_at(),
            InstrumentEvent::StatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Instrument {
    type Command = InstrumentCommand;
    type Event = InstrumentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InstrumentEvent::Created(e) => {
                self.id = e.instrument_id;
                self.owner = Some(e.owner);
                self.name = e.name.clone();
                self.identity = Some(e.identity);
                self.currency = Some(e.currency.clone());
                self.resource = Some(e.resource.clone());
                self.status = EntityStatus::Unauthorized;
                self.created_at = Some(e.occurred_at);
                self.external_id = e.external_id.clone();
                self.metadata = e.metadata.clone();
                self.created = true;
            }
            InstrumentEvent::Account(e) => {
                self.account.get_or_insert_with(LedgerAccount::shell).apply(e);
            }
            InstrumentEvent::StatusChanged(e) => {
                self.status = self.status.advance_to(e.status);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InstrumentCommand::CreateInstrument(cmd) => self.handle_create(cmd),
            InstrumentCommand::AuthorizeInstrument(cmd) => self.handle_authorize(cmd),
        }
    }
}

impl Instrument {
    fn handle_create(&self, cmd: &CreateInstrument) -> Result<Vec<InstrumentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("instrument already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.resource.kind.trim().is_empty() {
            return Err(DomainError::validation("resource kind cannot be empty"));
        }

        // No authorization event: instruments start unauthorized and wait
        // for an explicit authorize command.
        Ok(vec![
            InstrumentEvent::Created(InstrumentCreated {
                instrument_id: cmd.instrument_id,
                owner: cmd.owner,
                name: cmd.name.clone(),
                identity: cmd.identity,
                currency: cmd.currency.clone(),
                resource: cmd.resource.clone(),
                external_id: cmd.external_id.clone(),
                metadata: cmd.metadata.clone(),
                occurred_at: cmd.occurred_at,
            }),
            InstrumentEvent::Account(LedgerAccount::open(
                cmd.identity,
                cmd.currency.clone(),
                cmd.occurred_at,
            )),
        ])
    }

    fn handle_authorize(
        &self,
        cmd: &AuthorizeInstrument,
    ) -> Result<Vec<InstrumentEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.status.is_authorized() {
            return Ok(vec![]);
        }
        Ok(vec![InstrumentEvent::StatusChanged(StatusChanged {
            status: EntityStatus::Authorized,
            occurred_at: cmd.occurred_at,
        })])
    }
}

impl CreatableEntity for Instrument {
    const KIND: EntityKind = EntityKind::Instrument;
    const SCHEMA_VERSION: u32 = 4;

    type Params = InstrumentParams;

    fn empty(id: EntityId) -> Self {
        Instrument::empty(InstrumentId::new(id))
    }

    fn created(&self) -> bool {
        self.created
    }

    fn external_id(params: &Self::Params) -> Option<&ExternalId> {
        params.external_id.as_ref()
    }

    fn migrations() -> MigrationChain {
        migrate::chain()
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
        let shell = Instrument::empty(InstrumentId::new(id));
        shell.handle(&InstrumentCommand::CreateInstrument(CreateInstrument {
            instrument_id: InstrumentId::new(id),
            owner,
            name: params.name.clone(),
            identity: params.identity,
            currency: params.currency.clone(),
            resource: params.resource.clone(),
            external_id: params.external_id.clone(),
            metadata: params.metadata.clone(),
            occurred_at,
        }))
    }

    fn authorize_events(
        &self,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<Self::Event>, DomainError> {
        self.handle(&InstrumentCommand::AuthorizeInstrument(
            AuthorizeInstrument { occurred_at },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_instrument_id() -> InstrumentId {
        InstrumentId::new(EntityId::new())
    }

    fn usd() -> CurrencyCode {
        CurrencyCode::new("USD").unwrap()
    }

    fn card_resource() -> InstrumentResource {
        InstrumentResource::new("visa").with_field("reference", "tok_4xk2")
    }

    fn create_cmd(
        instrument_id: InstrumentId,
        owner: PartyId,
        identity: EntityId,
    ) -> CreateInstrument {
        CreateInstrument {
            instrument_id,
            owner,
            name: "Corporate card".to_string(),
            identity,
            currency: usd(),
            resource: card_resource(),
            external_id: Some(ExternalId::new("ext-card-1").unwrap()),
            metadata: Metadata::new(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn create_emits_created_and_account_opened_only() {
        let instrument_id = test_instrument_id();
        let instrument = Instrument::empty(instrument_id);

        let events = instrument
            .handle(&InstrumentCommand::CreateInstrument(create_cmd(
                instrument_id,
                PartyId::new(),
                EntityId::new(),
            )))
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], InstrumentEvent::Created(_)));
        assert!(matches!(
            events[1],
            InstrumentEvent::Account(AccountEvent::Opened(_))
        ));
    }

    #[test]
    fn created_instrument_is_unauthorized_until_authorized() {
        let instrument_id = test_instrument_id();
        let mut instrument = Instrument::empty(instrument_id);
        let events = instrument
            .handle(&InstrumentCommand::CreateInstrument(create_cmd(
                instrument_id,
                PartyId::new(),
                EntityId::new(),
            )))
            .unwrap();
        for e in &events {
            instrument.apply(e);
        }
        assert!(instrument.created);
        assert_eq!(instrument.status(), EntityStatus::Unauthorized);

        let auth = instrument
            .handle(&InstrumentCommand::AuthorizeInstrument(
                AuthorizeInstrument {
                    occurred_at: Utc::now(),
                },
            ))
            .unwrap();
        assert_eq!(auth.len(), 1);
        for e in &auth {
            instrument.apply(e);
        }
        assert_eq!(instrument.status(), EntityStatus::Authorized);
    }

    #[test]
    fn authorize_is_idempotent() {
        let instrument_id = test_instrument_id();
        let mut instrument = Instrument::empty(instrument_id);
        let events = instrument
            .handle(&InstrumentCommand::CreateInstrument(create_cmd(
                instrument_id,
                PartyId::new(),
                EntityId::new(),
            )))
            .unwrap();
        for e in &events {
            instrument.apply(e);
        }
        let first = instrument.authorize_events(Utc::now()).unwrap();
        for e in &first {
            instrument.apply(e);
        }
        let second = instrument.authorize_events(Utc::now()).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn authorize_before_creation_is_not_found() {
        let instrument = Instrument::empty(test_instrument_id());
        let err = instrument.authorize_events(Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::NotFound));
    }

    #[test]
    fn fold_materializes_resource_and_account() {
        let instrument_id = test_instrument_id();
        let identity = EntityId::new();
        let mut instrument = Instrument::empty(instrument_id);
        let events = instrument
            .handle(&InstrumentCommand::CreateInstrument(create_cmd(
                instrument_id,
                PartyId::new(),
                identity,
            )))
            .unwrap();
        for e in &events {
            instrument.apply(e);
        }

        let resource = instrument.resource().expect("resource present");
        assert_eq!(resource.kind, "visa");
        assert_eq!(resource.fields.get("reference").map(String::as_str), Some("tok_4xk2"));
        let account = instrument.account().expect("account sub-aggregate present");
        assert!(account.is_open());
        assert_eq!(account.identity(), Some(identity));
        assert_eq!(instrument.version(), 2);
    }

    #[test]
    fn create_rejects_blank_resource_kind() {
        let instrument_id = test_instrument_id();
        let instrument = Instrument::empty(instrument_id);
        let mut cmd = create_cmd(instrument_id, PartyId::new(), EntityId::new());
        cmd.resource.kind = "  ".to_string();
        let err = instrument
            .handle(&InstrumentCommand::CreateInstrument(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn matches_replay_ignores_resource_details() {
        let instrument_id = test_instrument_id();
        let identity = EntityId::new();
        let mut instrument = Instrument::empty(instrument_id);
        let events = instrument
            .handle(&InstrumentCommand::CreateInstrument(create_cmd(
                instrument_id,
                PartyId::new(),
                identity,
            )))
            .unwrap();
        for e in &events {
            instrument.apply(e);
        }

        let replay = InstrumentParams {
            name: "Corporate card".to_string(),
            identity,
            currency: usd(),
            resource: InstrumentResource::new("mastercard"),
            external_id: None,
            metadata: Metadata::new(),
        };
        assert!(instrument.matches_replay(&replay));

        let different_identity = InstrumentParams {
            identity: EntityId::new(),
            ..replay
        };
        assert!(!instrument.matches_replay(&different_identity));
    }
}
