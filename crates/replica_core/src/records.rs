//! # Wire Records and Change Notifications
//!
//! Records are what the shared store keeps; [`Envelope`]s are what it pushes to
//! subscribers. Every envelope names the participant that caused the change so receivers
//! can drop their own echoes without comparing payloads.

use crate::types::{ComponentId, EntityId, ParticipantId, Vec3};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Stored form of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub name: String,
    /// `None` for shared/environment entities
    pub owner: Option<ParticipantId>,
}

/// Stored form of a component. `data` is encoded JSON text or a structured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub id: ComponentId,
    pub entity_id: EntityId,
    pub owner: Option<ParticipantId>,
    pub data: Value,
}

/// Stored form of a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub id: ParticipantId,
    pub name: String,
    /// Last known authoritative position
    #[serde(default)]
    pub position: Option<Vec3>,
}

/// Any record the store can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    Entity(EntityRecord),
    Component(ComponentRecord),
    Participant(ParticipantRecord),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Entity(_) => RecordKind::Entity,
            Record::Component(_) => RecordKind::Component,
            Record::Participant(_) => RecordKind::Participant,
        }
    }

    /// Raw identifier of the record, whatever its kind.
    pub fn id(&self) -> Uuid {
        match self {
            Record::Entity(record) => record.id.0,
            Record::Component(record) => record.id.0,
            Record::Participant(record) => record.id.0,
        }
    }
}

/// Kind of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Entity,
    Component,
    Participant,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [RecordKind::Entity, RecordKind::Component, RecordKind::Participant];
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Entity => write!(f, "entity"),
            RecordKind::Component => write!(f, "component"),
            RecordKind::Participant => write!(f, "participant"),
        }
    }
}

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Created,
    Patched,
    Removed,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Created => write!(f, "created"),
            Action::Patched => write!(f, "patched"),
            Action::Removed => write!(f, "removed"),
        }
    }
}

/// A subscription topic, rendered as `{kind}-{action}` (e.g. `component-patched`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    pub kind: RecordKind,
    pub action: Action,
}

impl Topic {
    pub fn new(kind: RecordKind, action: Action) -> Self {
        Self { kind, action }
    }

    /// Every topic the store publishes on.
    pub fn all() -> Vec<Topic> {
        RecordKind::ALL
            .iter()
            .flat_map(|kind| {
                [Action::Created, Action::Patched, Action::Removed]
                    .into_iter()
                    .map(move |action| Topic::new(*kind, action))
            })
            .collect()
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.kind, self.action)
    }
}

/// A single change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Change {
    EntityCreated(EntityRecord),
    EntityPatched(EntityRecord),
    EntityRemoved { id: EntityId },
    ComponentCreated(ComponentRecord),
    ComponentPatched(ComponentRecord),
    ComponentRemoved { id: ComponentId },
    ParticipantCreated(ParticipantRecord),
    ParticipantPatched(ParticipantRecord),
    ParticipantRemoved { id: ParticipantId },
}

impl Change {
    /// Builds the notification for `action` on `record`.
    pub fn from_record(action: Action, record: Record) -> Self {
        match (action, record) {
            (Action::Created, Record::Entity(r)) => Change::EntityCreated(r),
            (Action::Patched, Record::Entity(r)) => Change::EntityPatched(r),
            (Action::Removed, Record::Entity(r)) => Change::EntityRemoved { id: r.id },
            (Action::Created, Record::Component(r)) => Change::ComponentCreated(r),
            (Action::Patched, Record::Component(r)) => Change::ComponentPatched(r),
            (Action::Removed, Record::Component(r)) => Change::ComponentRemoved { id: r.id },
            (Action::Created, Record::Participant(r)) => Change::ParticipantCreated(r),
            (Action::Patched, Record::Participant(r)) => Change::ParticipantPatched(r),
            (Action::Removed, Record::Participant(r)) => Change::ParticipantRemoved { id: r.id },
        }
    }

    pub fn topic(&self) -> Topic {
        let (kind, action) = match self {
            Change::EntityCreated(_) => (RecordKind::Entity, Action::Created),
            Change::EntityPatched(_) => (RecordKind::Entity, Action::Patched),
            Change::EntityRemoved { .. } => (RecordKind::Entity, Action::Removed),
            Change::ComponentCreated(_) => (RecordKind::Component, Action::Created),
            Change::ComponentPatched(_) => (RecordKind::Component, Action::Patched),
            Change::ComponentRemoved { .. } => (RecordKind::Component, Action::Removed),
            Change::ParticipantCreated(_) => (RecordKind::Participant, Action::Created),
            Change::ParticipantPatched(_) => (RecordKind::Participant, Action::Patched),
            Change::ParticipantRemoved { .. } => (RecordKind::Participant, Action::Removed),
        };
        Topic::new(kind, action)
    }
}

/// A change tagged with the participant that caused it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// `None` when the change did not originate from a participant (e.g. store maintenance)
    pub origin: Option<ParticipantId>,
    pub change: Change,
}

impl Envelope {
    pub fn new(origin: Option<ParticipantId>, change: Change) -> Self {
        Self { origin, change }
    }

    pub fn topic(&self) -> Topic {
        self.change.topic()
    }
}
