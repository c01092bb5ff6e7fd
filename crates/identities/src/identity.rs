use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use paycore_core::{
    Aggregate, AggregateRoot, DomainError, EntityId, EntityKind, EntityStatus, ExternalId,
    Metadata, PartyId, ReferenceKind, ReferenceLookups,
};
use paycore_events::{CreatableEntity, Event, MigrationChain, StatusChanged};

/// Identity identifier (aggregate id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub EntityId);

impl IdentityId {
    pub fn new(id: EntityId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for IdentityId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Create-request parameters for an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityParams {
    pub provider: String,
    pub display_name: String,
    pub external_id: Option<ExternalId>,
    pub metadata: Metadata,
}

/// Aggregate root: Identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    id: IdentityId,
    owner: Option<PartyId>,
    provider: String,
    display_name: String,
    status: EntityStatus,
    created_at: Option<DateTime<Utc>>,
    external_id: Option<ExternalId>,
    metadata: Metadata,
    version: u64,
    created: bool,
}

impl Identity {
    /// Empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: IdentityId) -> Self {
        Self {
            id,
            owner: None,
            provider: String::new(),
            display_name: String::new(),
            status: EntityStatus::Unauthorized,
            created_at: None,
            external_id: None,
            metadata: Metadata::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> IdentityId {
        self.id
    }

    pub fn owner(&self) -> Option<PartyId> {
        self.owner
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
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

impl AggregateRoot for Identity {
    type Id = IdentityId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateIdentity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateIdentity {
    pub identity_id: IdentityId,
    pub owner: PartyId,
    pub provider: String,
    pub display_name: String,
    pub external_id: Option<ExternalId>,
    pub metadata: Metadata,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AuthorizeIdentity (idempotent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizeIdentity {
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityCommand {
    CreateIdentity(CreateIdentity),
    AuthorizeIdentity(AuthorizeIdentity),
}

/// Event: IdentityCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityCreated {
    pub identity_id: IdentityId,
    pub owner: PartyId,
    pub provider: String,
    pub display_name: String,
    pub external_id: Option<ExternalId>,
    pub metadata: Metadata,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityEvent {
    Created(IdentityCreated),
    StatusChanged(StatusChanged),
}

impl Event for IdentityEvent {
    fn event_type(&self) -> &'static str {
        match self {
            IdentityEvent::Created(_) => "identity.created",
            IdentityEvent::StatusChanged(_) => "identity.status_changed",
        }
    }

    fn version(&self) -> u32 {
        Identity::SCHEMA_VERSION
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            IdentityEvent::Created(e) => e.occurred_at,
            IdentityEvent::StatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Identity {
    type Command = IdentityCommand;
    type Event = IdentityEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            IdentityEvent::Created(e) => {
                self.id = e.identity_id;
                self.owner = Some(e.owner);
                self.provider = e.provider.clone();
                self.display_name = e.display_name.clone();
                self.status = EntityStatus::Unauthorized;
                self.created_at = Some(e.occurred_at);
                self.external_id = e.external_id.clone();
                self.metadata = e.metadata.clone();
                self.created = true;
            }
            IdentityEvent::StatusChanged(e) => {
                self.status = self.status.advance_to(e.status);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            IdentityCommand::CreateIdentity(cmd) => self.handle_create(cmd),
            IdentityCommand::AuthorizeIdentity(cmd) => self.handle_authorize(cmd),
        }
    }
}

impl Identity {
    fn handle_create(&self, cmd: &CreateIdentity) -> Result<Vec<IdentityEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("identity already exists"));
        }
        if cmd.provider.trim().is_empty() {
            return Err(DomainError::validation("provider cannot be empty"));
        }
        if cmd.display_name.trim().is_empty() {
            return Err(DomainError::validation("display name cannot be empty"));
        }

        // Identity creation is validated synchronously, so the batch ends
        // with the authorization transition.
        Ok(vec![
            IdentityEvent::Created(IdentityCreated {
                identity_id: cmd.identity_id,
                owner: cmd.owner,
                provider: cmd.provider.clone(),
                display_name: cmd.display_name.clone(),
                external_id: cmd.external_id.clone(),
                metadata: cmd.metadata.clone(),
                occurred_at: cmd.occurred_at,
            }),
            IdentityEvent::StatusChanged(StatusChanged {
                status: EntityStatus::Authorized,
                occurred_at: cmd.occurred_at,
            }),
        ])
    }

    fn handle_authorize(&self, cmd: &AuthorizeIdentity) -> Result<Vec<IdentityEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.status.is_authorized() {
            return Ok(vec![]);
        }
        Ok(vec![IdentityEvent::StatusChanged(StatusChanged {
            status: EntityStatus::Authorized,
            occurred_at: cmd.occurred_at,
        })])
    }
}

impl CreatableEntity for Identity {
    const KIND: EntityKind = EntityKind::Identity;
    const SCHEMA_VERSION: u32 = 1;

    type Params = IdentityParams;

    fn empty(id: EntityId) -> Self {
        Identity::empty(IdentityId::new(id))
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
        _owner: PartyId,
        params: &Self::Params,
        refs: &dyn ReferenceLookups,
    ) -> Result<(), DomainError> {
        if !refs.provider_known(&params.provider) {
            return Err(DomainError::reference_not_found(ReferenceKind::Provider));
        }
        Ok(())
    }

    fn matches_replay(&self, params: &Self::Params) -> bool {
        // Defining fields only: provider + display name. Metadata and the
        // optional dedup key never participate.
        self.provider == params.provider && self.display_name == params.display_name
    }

    fn creation_events(
        id: EntityId,
        owner: PartyId,
        params: &Self::Params,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<Self::Event>, DomainError> {
        let shell = Identity::empty(IdentityId::new(id));
        shell.handle(&IdentityCommand::CreateIdentity(CreateIdentity {
            identity_id: IdentityId::new(id),
            owner,
            provider: params.provider.clone(),
            display_name: params.display_name.clone(),
            external_id: params.external_id.clone(),
            metadata: params.metadata.clone(),
            occurred_at,
        }))
    }

    fn authorize_events(
        &self,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<Self::Event>, DomainError> {
        self.handle(&IdentityCommand::AuthorizeIdentity(AuthorizeIdentity {
            occurred_at,
        }))
    }
}
