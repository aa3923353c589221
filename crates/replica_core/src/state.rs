//! Per-process synchronization state.
//!
//! [`SyncState`] bundles everything the Apply Engine and the Outbound Sync Driver mutate:
//! the directory, the pending buffer, the live scene and the counters. It is owned by one
//! session and never shared between sessions.

use crate::config::SyncConfig;
use crate::directory::{Component, Directory, Entity};
use crate::error::SyncError;
use crate::ownership::classify;
use crate::payload::{encode_payload, ComponentKind, ComponentPayload};
use crate::pending::PendingBuffer;
use crate::records::{ComponentRecord, EntityRecord};
use crate::scene::Scene;
use crate::stats::SyncStats;
use crate::types::{ComponentId, EntityId, ParticipantId};
use std::collections::BTreeSet;

/// A component attached to a locally created entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalComponent {
    pub payload: ComponentPayload,
    /// Local-only components (camera state, render hints) never leave the process
    pub networked: bool,
}

impl LocalComponent {
    pub fn networked(payload: ComponentPayload) -> Self {
        Self { payload, networked: true }
    }

    pub fn local_only(payload: ComponentPayload) -> Self {
        Self { payload, networked: false }
    }
}

#[derive(Debug)]
pub struct SyncState {
    pub(crate) local: ParticipantId,
    pub directory: Directory,
    pub pending: PendingBuffer,
    pub scene: Box<dyn Scene>,
    pub stats: SyncStats,
}

impl SyncState {
    pub fn new(local: ParticipantId, scene: Box<dyn Scene>, config: &SyncConfig) -> Self {
        Self {
            local,
            directory: Directory::new(),
            pending: PendingBuffer::new(config.max_retry_attempts, config.pending_ttl()),
            scene,
            stats: SyncStats::default(),
        }
    }

    pub fn local(&self) -> ParticipantId {
        self.local
    }

    /// Creates an entity owned by the local participant and returns the records to publish.
    ///
    /// Networked components are registered in the directory as
    /// [`Ownership::Owned`](crate::ownership::Ownership::Owned); local-only components exist
    /// in the scene alone.
    pub fn spawn_owned(
        &mut self,
        name: &str,
        components: &[LocalComponent],
    ) -> Result<(EntityRecord, Vec<ComponentRecord>), SyncError> {
        self.spawn_local(name, Some(self.local), components)
    }

    /// Creates an environment entity with no owner.
    ///
    /// Its components are remote for every participant, the creator included: local writes
    /// to them stay in the scene and are never published, and leaving does not retract them.
    pub fn spawn_environment(
        &mut self,
        name: &str,
        components: &[LocalComponent],
    ) -> Result<(EntityRecord, Vec<ComponentRecord>), SyncError> {
        self.spawn_local(name, None, components)
    }

    fn spawn_local(
        &mut self,
        name: &str,
        owner: Option<ParticipantId>,
        components: &[LocalComponent],
    ) -> Result<(EntityRecord, Vec<ComponentRecord>), SyncError> {
        let entity_id = EntityId::new();

        let mut kinds = BTreeSet::new();
        for local in components {
            let kind = local.payload.kind();
            if !kinds.insert(kind) {
                return Err(SyncError::DuplicateKind { entity: entity_id, kind });
            }
        }

        let ownership = classify(owner, self.local);
        let handle = self.scene.spawn();
        self.directory
            .upsert_entity(Entity::new(entity_id, handle, name, owner));

        let mut records = Vec::new();
        for local in components {
            self.scene.merge(handle, &local.payload);
            if !local.networked {
                continue;
            }

            let component_id = ComponentId::new();
            self.directory.upsert_component(Component::new(
                component_id,
                entity_id,
                local.payload,
                ownership,
            ));
            records.push(ComponentRecord {
                id: component_id,
                entity_id,
                owner,
                data: encode_payload(&local.payload)?,
            });
        }

        let entity = EntityRecord {
            id: entity_id,
            name: name.to_string(),
            owner,
        };
        Ok((entity, records))
    }

    /// Forgets a locally created entity whose publication failed.
    pub fn discard_local(&mut self, entity: &EntityId) -> bool {
        match self.directory.remove_entity(entity) {
            Some((removed, _)) => {
                self.scene.despawn(removed.handle);
                true
            }
            None => false,
        }
    }

    /// Live scene value of the component of `kind` on `entity`.
    pub fn live_component(&self, entity: &EntityId, kind: ComponentKind) -> Option<ComponentPayload> {
        let handle = self.directory.lookup_entity(entity)?.handle;
        self.scene.component(handle, kind).copied()
    }
}
