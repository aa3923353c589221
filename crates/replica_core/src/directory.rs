//! # Directory
//!
//! The mapping from remote identifiers to local state: entities, components and
//! participants, all addressable in O(1) by remote id.
//!
//! ## Invariants
//!
//! - A component is only stored once its parent entity is present. Upserting a component
//!   whose parent is absent returns [`UpsertOutcome::Deferred`] and stores nothing; the
//!   caller decides how to retry.
//! - Removing an entity removes every component that references it.
//! - An entity carries at most one component of each [`ComponentKind`]: the live scene has
//!   one slot per kind. A second one is refused with [`UpsertOutcome::KindTaken`].
//! - Reads never fail: a missing key is reported as `None`.
//!
//! One directory belongs to exactly one synchronization context. It is not internally
//! synchronized; callers serialize access (see [`SyncSession`](crate::session::SyncSession)).

use crate::ownership::Ownership;
use crate::payload::{ComponentKind, ComponentPayload};
use crate::types::{ComponentId, EntityId, LocalHandle, ParticipantId, Vec3};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A scene-graph node known to this participant.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub remote_id: EntityId,
    pub handle: LocalHandle,
    pub name: String,
    pub owner: Option<ParticipantId>,
    pub components: BTreeSet<ComponentId>,
}

impl Entity {
    pub fn new(remote_id: EntityId, handle: LocalHandle, name: impl Into<String>, owner: Option<ParticipantId>) -> Self {
        Self {
            remote_id,
            handle,
            name: name.into(),
            owner,
            components: BTreeSet::new(),
        }
    }
}

/// A networked, typed record attached to exactly one entity.
///
/// Local-only component state lives in the scene and never enters the directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub remote_id: ComponentId,
    /// Back-reference to the parent entity
    pub entity_id: EntityId,
    pub kind: ComponentKind,
    /// Last payload seen on the wire (remote) or last payload published (owned)
    pub payload: ComponentPayload,
    pub ownership: Ownership,
}

impl Component {
    pub fn new(remote_id: ComponentId, entity_id: EntityId, payload: ComponentPayload, ownership: Ownership) -> Self {
        Self {
            remote_id,
            entity_id,
            kind: payload.kind(),
            payload,
            ownership,
        }
    }
}

/// A connected user.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub position: Option<Vec3>,
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The parent entity is not present yet; nothing was stored
    Deferred,
    /// The parent already has another component of this kind; nothing was stored
    KindTaken,
}

/// Order-independent view of a directory, used to compare participants' state.
///
/// Local handles are deliberately absent: they differ between processes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DirectorySnapshot {
    pub entities: BTreeMap<EntityId, (String, Option<ParticipantId>)>,
    pub components: BTreeMap<ComponentId, (EntityId, ComponentPayload)>,
    pub participants: BTreeMap<ParticipantId, String>,
}

#[derive(Debug, Default)]
pub struct Directory {
    entities: HashMap<EntityId, Entity>,
    components: HashMap<ComponentId, Component>,
    participants: HashMap<ParticipantId, Participant>,
    handles: HashMap<LocalHandle, EntityId>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------

    /// Inserts an entity, or refreshes the name of an existing one.
    ///
    /// The handle, owner and component set of an existing entity are kept.
    pub fn upsert_entity(&mut self, entity: Entity) -> UpsertOutcome {
        if let Some(existing) = self.entities.get_mut(&entity.remote_id) {
            existing.name = entity.name;
            return UpsertOutcome::Updated;
        }

        self.handles.insert(entity.handle, entity.remote_id);
        self.entities.insert(entity.remote_id, entity);
        UpsertOutcome::Inserted
    }

    /// Removes an entity and every component that references it.
    pub fn remove_entity(&mut self, id: &EntityId) -> Option<(Entity, Vec<Component>)> {
        let entity = self.entities.remove(id)?;
        self.handles.remove(&entity.handle);

        let mut removed: Vec<Component> = entity
            .components
            .iter()
            .filter_map(|component_id| self.components.remove(component_id))
            .collect();

        // Catch components whose back-reference points here but were never linked
        let strays: Vec<ComponentId> = self
            .components
            .values()
            .filter(|component| component.entity_id == *id)
            .map(|component| component.remote_id)
            .collect();
        for stray in strays {
            if let Some(component) = self.components.remove(&stray) {
                removed.push(component);
            }
        }

        Some((entity, removed))
    }

    pub fn lookup_entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn entity_by_handle(&self, handle: LocalHandle) -> Option<&Entity> {
        self.handles.get(&handle).and_then(|id| self.entities.get(id))
    }

    pub fn contains_entity(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Entities whose owner is `participant`.
    pub fn owned_entities(&self, participant: ParticipantId) -> Vec<EntityId> {
        self.entities
            .values()
            .filter(|entity| entity.owner == Some(participant))
            .map(|entity| entity.remote_id)
            .collect()
    }

    // ------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------

    /// Inserts a component under its parent entity, or refreshes the payload of an existing
    /// one. Kind and ownership of an existing component never change.
    pub fn upsert_component(&mut self, component: Component) -> UpsertOutcome {
        if let Some(existing) = self.components.get_mut(&component.remote_id) {
            existing.payload = component.payload;
            return UpsertOutcome::Updated;
        }

        let Some(parent) = self.entities.get_mut(&component.entity_id) else {
            return UpsertOutcome::Deferred;
        };
        let taken = parent
            .components
            .iter()
            .filter_map(|id| self.components.get(id))
            .any(|sibling| sibling.kind == component.kind);
        if taken {
            return UpsertOutcome::KindTaken;
        }

        parent.components.insert(component.remote_id);
        self.components.insert(component.remote_id, component);
        UpsertOutcome::Inserted
    }

    pub fn remove_component(&mut self, id: &ComponentId) -> Option<Component> {
        let component = self.components.remove(id)?;
        if let Some(parent) = self.entities.get_mut(&component.entity_id) {
            parent.components.remove(id);
        }
        Some(component)
    }

    pub fn lookup_component(&self, id: &ComponentId) -> Option<&Component> {
        self.components.get(id)
    }

    pub(crate) fn lookup_component_mut(&mut self, id: &ComponentId) -> Option<&mut Component> {
        self.components.get_mut(id)
    }

    pub fn contains_component(&self, id: &ComponentId) -> bool {
        self.components.contains_key(id)
    }

    /// The component of `kind` attached to `entity`, if any.
    pub fn component_of_kind(&self, entity: &EntityId, kind: ComponentKind) -> Option<&Component> {
        let entity = self.entities.get(entity)?;
        entity
            .components
            .iter()
            .filter_map(|id| self.components.get(id))
            .find(|component| component.kind == kind)
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Components classified as [`Ownership::Owned`].
    pub fn owned_components(&self) -> Vec<ComponentId> {
        self.components
            .values()
            .filter(|component| component.ownership.is_owned())
            .map(|component| component.remote_id)
            .collect()
    }

    // ------------------------------------------------------------------
    // Participants
    // ------------------------------------------------------------------

    pub fn upsert_participant(&mut self, participant: Participant) -> UpsertOutcome {
        match self.participants.insert(participant.id, participant) {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        }
    }

    pub fn remove_participant(&mut self, id: &ParticipantId) -> Option<Participant> {
        self.participants.remove(id)
    }

    pub fn lookup_participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn snapshot(&self) -> DirectorySnapshot {
        DirectorySnapshot {
            entities: self
                .entities
                .values()
                .map(|e| (e.remote_id, (e.name.clone(), e.owner)))
                .collect(),
            components: self
                .components
                .values()
                .map(|c| (c.remote_id, (c.entity_id, c.payload)))
                .collect(),
            participants: self
                .participants
                .values()
                .map(|p| (p.id, p.name.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Transform;

    fn entity(handle: u64) -> Entity {
        Entity::new(EntityId::new(), LocalHandle(handle), "box", None)
    }

    fn position(entity_id: EntityId, z: f64) -> Component {
        Component::new(
            ComponentId::new(),
            entity_id,
            ComponentPayload::Position(Vec3::new(0.0, 0.0, z)),
            Ownership::Remote,
        )
    }

    #[test]
    fn test_component_without_parent_is_deferred() {
        let mut directory = Directory::new();
        let component = position(EntityId::new(), 40.0);
        let id = component.remote_id;

        assert_eq!(directory.upsert_component(component), UpsertOutcome::Deferred);
        assert!(directory.lookup_component(&id).is_none());
    }

    #[test]
    fn test_component_is_linked_to_parent() {
        let mut directory = Directory::new();
        let parent = entity(1);
        let parent_id = parent.remote_id;
        directory.upsert_entity(parent);

        let component = position(parent_id, 40.0);
        let component_id = component.remote_id;
        assert_eq!(directory.upsert_component(component), UpsertOutcome::Inserted);

        let stored = directory.lookup_entity(&parent_id).unwrap();
        assert!(stored.components.contains(&component_id));
        assert_eq!(
            directory.component_of_kind(&parent_id, ComponentKind::Position).map(|c| c.remote_id),
            Some(component_id)
        );
    }

    #[test]
    fn test_second_component_of_a_kind_is_refused() {
        let mut directory = Directory::new();
        let parent = entity(1);
        let parent_id = parent.remote_id;
        directory.upsert_entity(parent);

        let first = position(parent_id, 40.0);
        let first_id = first.remote_id;
        let second = position(parent_id, 41.0);
        let second_id = second.remote_id;

        assert_eq!(directory.upsert_component(first), UpsertOutcome::Inserted);
        assert_eq!(directory.upsert_component(second), UpsertOutcome::KindTaken);
        assert!(directory.lookup_component(&second_id).is_none());
        assert_eq!(
            directory.component_of_kind(&parent_id, ComponentKind::Position).map(|c| c.remote_id),
            Some(first_id)
        );
        assert_eq!(directory.lookup_entity(&parent_id).unwrap().components.len(), 1);
    }

    #[test]
    fn test_upsert_entity_twice_keeps_one() {
        let mut directory = Directory::new();
        let first = entity(1);
        let mut again = first.clone();
        again.handle = LocalHandle(99);

        assert_eq!(directory.upsert_entity(first.clone()), UpsertOutcome::Inserted);
        assert_eq!(directory.upsert_entity(again), UpsertOutcome::Updated);
        assert_eq!(directory.entity_count(), 1);
        // Original handle is kept
        assert_eq!(directory.lookup_entity(&first.remote_id).unwrap().handle, LocalHandle(1));
        assert!(directory.entity_by_handle(LocalHandle(99)).is_none());
    }

    #[test]
    fn test_upsert_component_keeps_ownership() {
        let mut directory = Directory::new();
        let parent = entity(1);
        let parent_id = parent.remote_id;
        directory.upsert_entity(parent);

        let mut component = position(parent_id, 40.0);
        component.ownership = Ownership::Owned;
        directory.upsert_component(component.clone());

        let mut update = component.clone();
        update.ownership = Ownership::Remote;
        update.payload = ComponentPayload::Position(Vec3::new(1.0, 0.0, 40.0));
        assert_eq!(directory.upsert_component(update), UpsertOutcome::Updated);

        let stored = directory.lookup_component(&component.remote_id).unwrap();
        assert_eq!(stored.ownership, Ownership::Owned);
        assert_eq!(stored.payload.position(), Vec3::new(1.0, 0.0, 40.0));
    }

    #[test]
    fn test_remove_entity_cascades() {
        let mut directory = Directory::new();
        let parent = entity(7);
        let parent_id = parent.remote_id;
        directory.upsert_entity(parent);
        let a = position(parent_id, 1.0);
        let b = Component::new(
            ComponentId::new(),
            parent_id,
            ComponentPayload::Transform(Transform::default()),
            Ownership::Remote,
        );
        let (a_id, b_id) = (a.remote_id, b.remote_id);
        directory.upsert_component(a);
        directory.upsert_component(b);

        let (removed, components) = directory.remove_entity(&parent_id).unwrap();
        assert_eq!(removed.handle, LocalHandle(7));
        assert_eq!(components.len(), 2);
        assert!(directory.lookup_component(&a_id).is_none());
        assert!(directory.lookup_component(&b_id).is_none());
        assert!(directory.entity_by_handle(LocalHandle(7)).is_none());
        assert_eq!(directory.component_count(), 0);
    }

    #[test]
    fn test_missing_keys_read_as_none() {
        let mut directory = Directory::new();
        assert!(directory.lookup_entity(&EntityId::new()).is_none());
        assert!(directory.lookup_component(&ComponentId::new()).is_none());
        assert!(directory.lookup_participant(&ParticipantId::new()).is_none());
        assert!(directory.remove_entity(&EntityId::new()).is_none());
        assert!(directory.remove_component(&ComponentId::new()).is_none());
    }

    #[test]
    fn test_remove_component_unlinks_parent() {
        let mut directory = Directory::new();
        let parent = entity(1);
        let parent_id = parent.remote_id;
        directory.upsert_entity(parent);
        let component = position(parent_id, 1.0);
        let component_id = component.remote_id;
        directory.upsert_component(component);

        assert!(directory.remove_component(&component_id).is_some());
        assert!(directory.lookup_entity(&parent_id).unwrap().components.is_empty());
    }

    #[test]
    fn test_owned_enumeration() {
        let mut directory = Directory::new();
        let me = ParticipantId::new();
        let mut mine = entity(1);
        mine.owner = Some(me);
        let mine_id = mine.remote_id;
        directory.upsert_entity(mine);
        directory.upsert_entity(entity(2));

        let mut component = position(mine_id, 0.0);
        component.ownership = Ownership::Owned;
        let component_id = component.remote_id;
        directory.upsert_component(component);

        assert_eq!(directory.owned_entities(me), vec![mine_id]);
        assert_eq!(directory.owned_components(), vec![component_id]);
    }

    #[test]
    fn test_participant_bookkeeping() {
        let mut directory = Directory::new();
        let id = ParticipantId::new();
        let participant = Participant { id, name: "alice".into(), position: None };

        assert_eq!(directory.upsert_participant(participant.clone()), UpsertOutcome::Inserted);
        assert_eq!(directory.upsert_participant(participant), UpsertOutcome::Updated);
        assert_eq!(directory.participant_count(), 1);
        assert!(directory.remove_participant(&id).is_some());
        assert_eq!(directory.participant_count(), 0);
    }
}
