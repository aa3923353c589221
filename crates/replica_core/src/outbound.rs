//! # Outbound Sync Driver
//!
//! Runs once per simulation tick. [`SyncState::collect_outbound`] turns the scene's change
//! detection into patch records for owned, networked components (at most one per component
//! per tick) and [`publish`] sends each one as an independent store write.
//!
//! Failed patches are logged and reported, never retried here: the next local change
//! produces a fresh patch anyway.

use crate::error::{SyncError, TransportError};
use crate::payload::encode_payload;
use crate::records::{ComponentRecord, Record};
use crate::state::SyncState;
use crate::transport::Transport;
use crate::types::{ComponentId, ParticipantId};
use futures::future::join_all;
use tracing::{debug, trace, warn};

/// Result of one outbound pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    pub published: Vec<ComponentId>,
    pub failures: Vec<(ComponentId, TransportError)>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.published.is_empty() && self.failures.is_empty()
    }
}

impl SyncState {
    /// Collects one patch record per owned component written since the previous call.
    ///
    /// The directory's cached payload is refreshed to the value being published. Writes to
    /// remote components are discarded: they are overwritten by the next inbound patch.
    pub fn collect_outbound(&mut self) -> Result<Vec<ComponentRecord>, SyncError> {
        let mut patches = Vec::new();

        for (handle, kind) in self.scene.take_changed() {
            let Some(entity) = self.directory.entity_by_handle(handle) else {
                trace!(%handle, "change on an entity unknown to the directory");
                continue;
            };
            let entity_id = entity.remote_id;

            let Some(component) = self.directory.component_of_kind(&entity_id, kind) else {
                // Local-only component
                continue;
            };
            if !component.ownership.is_owned() {
                debug!(component = %component.remote_id, "local write to a remote component ignored");
                continue;
            }
            let component_id = component.remote_id;

            let Some(live) = self.scene.component(handle, kind).copied() else {
                continue;
            };
            let data = encode_payload(&live)?;

            if let Some(cached) = self.directory.lookup_component_mut(&component_id) {
                cached.payload = live;
            }
            let owner = self.directory.lookup_entity(&entity_id).and_then(|e| e.owner);
            patches.push(ComponentRecord {
                id: component_id,
                entity_id,
                owner,
                data,
            });
        }

        Ok(patches)
    }
}

/// Publishes every patch concurrently, one store write per component.
pub async fn publish(transport: &dyn Transport, local: ParticipantId, patches: Vec<ComponentRecord>) -> TickReport {
    let writes = patches.into_iter().map(|patch| async move {
        let id = patch.id;
        (id, transport.patch(Record::Component(patch), local).await)
    });

    let mut report = TickReport::default();
    for (id, result) in join_all(writes).await {
        match result {
            Ok(()) => report.published.push(id),
            Err(e) => {
                warn!(component = %id, error = %e, "outbound patch failed");
                report.failures.push((id, e));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::payload::{decode_payload, ComponentKind, ComponentPayload};
    use crate::records::{Change, EntityRecord, Envelope, RecordKind};
    use crate::scene::MemoryScene;
    use crate::state::LocalComponent;
    use crate::transport::MemoryStore;
    use crate::types::{EntityId, Vec3};

    fn state() -> SyncState {
        SyncState::new(ParticipantId::new(), Box::new(MemoryScene::new()), &SyncConfig::default())
    }

    fn nudge(state: &mut SyncState, entity: &EntityId, dx: f64) {
        let handle = state.directory.lookup_entity(entity).unwrap().handle;
        if let Some(ComponentPayload::Position(p)) = state.scene.component_mut(handle, ComponentKind::Position) {
            p.x += dx;
        }
    }

    #[test]
    fn test_one_patch_per_changed_owned_component() {
        let mut state = state();
        let (entity, components) = state
            .spawn_owned(
                "User Entity",
                &[LocalComponent::networked(ComponentPayload::Position(Vec3::new(0.0, 0.0, 40.0)))],
            )
            .unwrap();

        assert!(state.collect_outbound().unwrap().is_empty());

        nudge(&mut state, &entity.id, 0.5);
        nudge(&mut state, &entity.id, 0.5);
        let patches = state.collect_outbound().unwrap();

        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].id, components[0].id);
        assert_eq!(
            decode_payload(patches[0].id, &patches[0].data).unwrap(),
            ComponentPayload::Position(Vec3::new(1.0, 0.0, 40.0))
        );
        assert!(patches[0].data.is_string());
        assert_eq!(
            state.directory.lookup_component(&components[0].id).unwrap().payload,
            ComponentPayload::Position(Vec3::new(1.0, 0.0, 40.0))
        );
        assert!(state.collect_outbound().unwrap().is_empty());
    }

    #[test]
    fn test_local_only_and_remote_components_are_not_published() {
        let mut state = state();
        let (entity, records) = state
            .spawn_owned(
                "Camera",
                &[LocalComponent::local_only(ComponentPayload::Position(Vec3::zero()))],
            )
            .unwrap();
        assert!(records.is_empty());
        nudge(&mut state, &entity.id, 1.0);
        assert!(state.collect_outbound().unwrap().is_empty());

        let other = ParticipantId::new();
        let remote = EntityRecord {
            id: EntityId::new(),
            name: "Other".to_string(),
            owner: Some(other),
        };
        state
            .apply(Envelope::new(Some(other), Change::EntityCreated(remote.clone())))
            .unwrap();
        state
            .apply(Envelope::new(
                Some(other),
                Change::ComponentCreated(ComponentRecord {
                    id: ComponentId::new(),
                    entity_id: remote.id,
                    owner: Some(other),
                    data: encode_payload(&ComponentPayload::Position(Vec3::zero())).unwrap(),
                }),
            ))
            .unwrap();

        nudge(&mut state, &remote.id, 1.0);
        assert!(state.collect_outbound().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_reports_failures_without_retry() {
        let store = MemoryStore::new();
        let mut state = state();
        let local = state.local();
        let (entity, components) = state
            .spawn_owned(
                "User Entity",
                &[LocalComponent::networked(ComponentPayload::Position(Vec3::zero()))],
            )
            .unwrap();
        store.create(Record::Entity(entity.clone()), local).await.unwrap();
        store
            .create(Record::Component(components[0].clone()), local)
            .await
            .unwrap();

        nudge(&mut state, &entity.id, 1.0);
        let report = publish(&store, local, state.collect_outbound().unwrap()).await;
        assert_eq!(report.published, vec![components[0].id]);

        store.set_offline(true);
        nudge(&mut state, &entity.id, 1.0);
        let report = publish(&store, local, state.collect_outbound().unwrap()).await;
        assert!(report.published.is_empty());
        assert_eq!(report.failures.len(), 1);

        store.set_offline(false);
        let stored = store.get(RecordKind::Component, components[0].id.0).unwrap();
        let Record::Component(stored) = stored else {
            panic!("expected a component record");
        };
        assert_eq!(
            decode_payload(stored.id, &stored.data).unwrap().position(),
            Vec3::new(1.0, 0.0, 0.0)
        );
    }
}
