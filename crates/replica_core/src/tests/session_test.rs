//! Full sessions over the in-memory store.

use crate::apply::ApplyOutcome;
use crate::config::SyncConfig;
use crate::directory::DirectorySnapshot;
use crate::error::{SyncError, TransportError};
use crate::payload::{encode_payload, ComponentKind, ComponentPayload};
use crate::records::{Change, ComponentRecord, EntityRecord, Envelope, Record, RecordKind, Topic};
use crate::scene::MemoryScene;
use crate::session::{Identity, SyncSession};
use crate::state::LocalComponent;
use crate::stats::SyncStats;
use crate::transport::{MemoryStore, Transport};
use crate::types::{ComponentId, EntityId, ParticipantId, Transform, Vec3};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const POLL_ATTEMPTS: usize = 200;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn session(store: &Arc<MemoryStore>, name: &str, config: SyncConfig) -> SyncSession {
    SyncSession::new(
        Identity::new(name, Some(format!("{name}-token"))),
        store.clone(),
        Box::new(MemoryScene::new()),
        config,
    )
}

fn avatar(position: Vec3) -> Vec<LocalComponent> {
    vec![
        LocalComponent::networked(ComponentPayload::Position(position)),
        LocalComponent::local_only(ComponentPayload::Transform(Transform::default())),
    ]
}

async fn wait_for_snapshot(session: &SyncSession, check: impl Fn(&DirectorySnapshot) -> bool) -> bool {
    for _ in 0..POLL_ATTEMPTS {
        if check(&session.snapshot().await) {
            return true;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    false
}

async fn wait_for_stats(session: &SyncSession, check: impl Fn(&SyncStats) -> bool) -> bool {
    for _ in 0..POLL_ATTEMPTS {
        if check(&session.stats().await) {
            return true;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    false
}

async fn wait_for_position(session: &SyncSession, entity: &EntityId, kind: ComponentKind, expected: Vec3) -> bool {
    for _ in 0..POLL_ATTEMPTS {
        if session.live_component(entity, kind).await.map(|p| p.position()) == Some(expected) {
            return true;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    false
}

async fn move_to(session: &SyncSession, entity: &EntityId, kind: ComponentKind, position: Vec3) {
    let handle = session.handle_of(entity).await.unwrap();
    session
        .with_scene(|scene| match scene.component_mut(handle, kind) {
            Some(ComponentPayload::Position(p)) => *p = position,
            Some(ComponentPayload::Transform(t)) => t.position = position,
            None => {}
        })
        .await;
}

#[tokio::test]
async fn test_late_joiner_bulk_loads_existing_state() {
    let store = Arc::new(MemoryStore::new());
    let alice = session(&store, "alice", SyncConfig::default());
    alice.join().await.unwrap();
    let avatar_id = alice.spawn_entity("User Entity", avatar(Vec3::new(0.0, 0.0, 40.0))).await.unwrap();

    let bob = session(&store, "bob", SyncConfig::default());
    let report = bob.join().await.unwrap();

    assert_eq!(report.entities_loaded, 1);
    assert_eq!(report.components_loaded, 1);
    assert_eq!(report.participants_loaded, 1);

    let snapshot = bob.snapshot().await;
    assert!(snapshot.participants.contains_key(&alice.local()));
    assert!(!snapshot.participants.contains_key(&bob.local()));
    assert_eq!(
        bob.live_component(&avatar_id, ComponentKind::Position).await,
        Some(ComponentPayload::Position(Vec3::new(0.0, 0.0, 40.0)))
    );
    // Local-only state never reached the store
    assert!(bob.live_component(&avatar_id, ComponentKind::Transform).await.is_none());
    assert_eq!(store.record_count(RecordKind::Component), 1);
}

#[tokio::test]
async fn test_live_patch_propagates_and_echo_is_suppressed() {
    let store = Arc::new(MemoryStore::new());
    let alice = session(&store, "alice", SyncConfig::default());
    let bob = session(&store, "bob", SyncConfig::default());
    alice.join().await.unwrap();
    bob.join().await.unwrap();

    let avatar_id = alice.spawn_entity("User Entity", avatar(Vec3::new(0.0, 0.0, 40.0))).await.unwrap();
    assert!(wait_for_position(&bob, &avatar_id, ComponentKind::Position, Vec3::new(0.0, 0.0, 40.0)).await);

    move_to(&alice, &avatar_id, ComponentKind::Position, Vec3::new(1.0, 0.0, 40.0)).await;
    let report = alice.tick().await.unwrap();
    assert_eq!(report.published.len(), 1);
    assert!(report.failures.is_empty());

    assert!(wait_for_position(&bob, &avatar_id, ComponentKind::Position, Vec3::new(1.0, 0.0, 40.0)).await);
    // create echoes plus the patch echo
    assert!(wait_for_stats(&alice, |stats| stats.echoes_suppressed >= 3).await);
    assert_eq!(
        alice.live_component(&avatar_id, ComponentKind::Position).await,
        Some(ComponentPayload::Position(Vec3::new(1.0, 0.0, 40.0)))
    );

    // Nothing changed since, so nothing is published
    assert!(alice.tick().await.unwrap().is_empty());

    // Bob writing to alice's component locally publishes nothing
    move_to(&bob, &avatar_id, ComponentKind::Position, Vec3::new(9.0, 9.0, 9.0)).await;
    assert!(bob.tick().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_leave_retracts_owned_state_from_peers() {
    let store = Arc::new(MemoryStore::new());
    let alice = session(&store, "alice", SyncConfig::default());
    let bob = session(&store, "bob", SyncConfig::default());
    alice.join().await.unwrap();
    bob.join().await.unwrap();

    let first = alice.spawn_entity("User Entity", avatar(Vec3::zero())).await.unwrap();
    let second = alice.spawn_entity("Pet", avatar(Vec3::new(2.0, 0.0, 0.0))).await.unwrap();
    let bob_avatar = bob.spawn_entity("User Entity", avatar(Vec3::zero())).await.unwrap();
    assert!(wait_for_snapshot(&bob, |s| s.entities.len() == 3 && s.components.len() == 3).await);

    let report = alice.leave().await.unwrap();
    assert_eq!(report.entities_removed, 2);
    assert_eq!(report.components_removed, 2);
    assert!(report.participant_removed);
    assert!(report.failures.is_empty());
    assert!(alice.shutdown_state().is_closed());

    let alice_id = alice.local();
    assert!(
        wait_for_snapshot(&bob, |s| {
            !s.entities.contains_key(&first)
                && !s.entities.contains_key(&second)
                && !s.participants.contains_key(&alice_id)
                && s.components.len() == 1
        })
        .await
    );
    assert!(bob.snapshot().await.entities.contains_key(&bob_avatar));

    // Leaving twice is refused, and a left session stops syncing
    assert!(matches!(alice.leave().await, Err(SyncError::ShuttingDown)));
    assert!(matches!(
        alice.spawn_entity("Late", avatar(Vec3::zero())).await,
        Err(SyncError::ShuttingDown)
    ));
    assert!(alice.tick().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_environment_entity_is_remote_for_everyone() {
    let store = Arc::new(MemoryStore::new());
    let alice = session(&store, "alice", SyncConfig::default());
    let bob = session(&store, "bob", SyncConfig::default());
    alice.join().await.unwrap();
    bob.join().await.unwrap();

    let spinning = alice
        .spawn_environment(
            "Rotating Box",
            vec![LocalComponent::networked(ComponentPayload::Transform(Transform::default()))],
        )
        .await
        .unwrap();
    assert!(wait_for_snapshot(&bob, |s| s.components.len() == 1).await);

    // The creator animates it locally without publishing
    move_to(&alice, &spinning, ComponentKind::Transform, Vec3::new(0.0, 3.0, 0.0)).await;
    assert!(alice.tick().await.unwrap().is_empty());
    assert_eq!(
        alice.live_component(&spinning, ComponentKind::Transform).await.map(|p| p.position()),
        Some(Vec3::new(0.0, 3.0, 0.0))
    );

    move_to(&bob, &spinning, ComponentKind::Transform, Vec3::new(7.0, 7.0, 7.0)).await;
    assert!(bob.tick().await.unwrap().is_empty());

    // The stored transform never moved
    let box_transform = *alice.snapshot().await.components.keys().next().unwrap();
    let Some(Record::Component(stored)) = store.get(RecordKind::Component, box_transform.0) else {
        panic!("box transform is not stored");
    };
    assert_eq!(
        stored.data,
        encode_payload(&ComponentPayload::Transform(Transform::default())).unwrap()
    );

    // Environment state outlives its creator
    let report = alice.leave().await.unwrap();
    assert_eq!(report.entities_removed, 0);
    assert_eq!(report.components_removed, 0);
    assert_eq!(store.record_count(RecordKind::Entity), 1);
    assert_eq!(store.record_count(RecordKind::Component), 1);
}

#[tokio::test]
async fn test_participant_position_reports_reach_peers() {
    let store = Arc::new(MemoryStore::new());
    let alice = session(&store, "alice", SyncConfig::default());
    let bob = session(&store, "bob", SyncConfig::default());
    alice.join().await.unwrap();
    bob.join().await.unwrap();

    alice.report_position(Vec3::new(4.0, 0.0, 2.0)).await.unwrap();

    let Some(Record::Participant(stored)) = store.get(RecordKind::Participant, alice.local().0) else {
        panic!("alice is not registered");
    };
    assert_eq!(stored.position, Some(Vec3::new(4.0, 0.0, 2.0)));
    assert!(wait_for_stats(&bob, |stats| stats.events_applied >= 2).await);
}

#[tokio::test]
async fn test_inert_identity_does_nothing() {
    let store = Arc::new(MemoryStore::new());
    let ghost = SyncSession::new(
        Identity::new("ghost", Some("   ".to_string())),
        store.clone(),
        Box::new(MemoryScene::new()),
        SyncConfig::default(),
    );

    assert!(ghost.is_inert());
    assert!(matches!(ghost.join().await, Err(SyncError::Inert(_))));
    assert!(matches!(
        ghost.spawn_entity("User Entity", avatar(Vec3::zero())).await,
        Err(SyncError::Inert(_))
    ));
    assert!(ghost.tick().await.unwrap().is_empty());
    assert_eq!(ghost.leave().await.unwrap().entities_removed, 0);
    assert_eq!(store.record_count(RecordKind::Participant), 0);
}

#[tokio::test]
async fn test_transport_failures_are_reported_not_fatal() {
    let store = Arc::new(MemoryStore::new());
    let alice = session(&store, "alice", SyncConfig::default());
    alice.join().await.unwrap();
    let avatar_id = alice.spawn_entity("User Entity", avatar(Vec3::zero())).await.unwrap();

    store.set_offline(true);
    move_to(&alice, &avatar_id, ComponentKind::Position, Vec3::new(1.0, 0.0, 0.0)).await;
    let report = alice.tick().await.unwrap();
    assert!(report.published.is_empty());
    assert!(matches!(report.failures[0].1, TransportError::Unavailable(_)));
    assert_eq!(alice.stats().await.publish_failures, 1);

    // No automatic retry: the failed patch is not resent
    store.set_offline(false);
    assert!(alice.tick().await.unwrap().is_empty());

    store.set_offline(true);
    let leave = alice.leave().await.unwrap();
    assert_eq!(leave.entities_removed, 0);
    assert!(!leave.participant_removed);
    assert_eq!(leave.failures.len(), 3);
}

#[tokio::test]
async fn test_reordered_inbound_events_resolve() {
    let store = Arc::new(MemoryStore::new());
    let bob = session(&store, "bob", SyncConfig::default());
    bob.join().await.unwrap();

    let alice = ParticipantId::new();
    let entity = EntityRecord {
        id: EntityId::new(),
        name: "User Entity".to_string(),
        owner: Some(alice),
    };
    let component = ComponentRecord {
        id: ComponentId::new(),
        entity_id: entity.id,
        owner: Some(alice),
        data: encode_payload(&ComponentPayload::Position(Vec3::new(0.0, 0.0, 40.0))).unwrap(),
    };

    let outcome = bob
        .handle_inbound(Envelope::new(Some(alice), Change::ComponentCreated(component.clone())))
        .await;
    assert!(matches!(outcome, Some(ApplyOutcome::Deferred { .. })));
    assert_eq!(bob.pending_len().await, 1);

    let outcome = bob
        .handle_inbound(Envelope::new(Some(alice), Change::EntityCreated(entity.clone())))
        .await;
    assert_eq!(outcome, Some(ApplyOutcome::Applied { resolved: vec![component.id] }));
    assert_eq!(bob.pending_len().await, 0);
    assert!(wait_for_position(&bob, &entity.id, ComponentKind::Position, Vec3::new(0.0, 0.0, 40.0)).await);
}

#[tokio::test]
async fn test_orphaned_component_is_dropped_after_retry_budget() {
    let store = Arc::new(MemoryStore::new());
    let config = SyncConfig {
        retry_backoff_ms: 5,
        max_retry_attempts: 3,
        ..SyncConfig::default()
    };
    let bob = session(&store, "bob", config);
    bob.join().await.unwrap();

    let orphan = ComponentRecord {
        id: ComponentId::new(),
        entity_id: EntityId::new(),
        owner: None,
        data: encode_payload(&ComponentPayload::Position(Vec3::zero())).unwrap(),
    };
    bob.handle_inbound(Envelope::new(None, Change::ComponentCreated(orphan))).await;
    assert_eq!(bob.pending_len().await, 1);

    assert!(wait_for_stats(&bob, |stats| stats.components_dropped == 1).await);
    assert_eq!(bob.pending_len().await, 0);
}

/// Delegates to a [`MemoryStore`] but never answers bulk queries.
#[derive(Debug)]
struct StalledQueries(Arc<MemoryStore>);

#[async_trait]
impl Transport for StalledQueries {
    async fn create(&self, record: Record, origin: ParticipantId) -> Result<(), TransportError> {
        self.0.create(record, origin).await
    }

    async fn find(&self, _kind: RecordKind) -> Result<Vec<Record>, TransportError> {
        futures::future::pending().await
    }

    async fn patch(&self, record: Record, origin: ParticipantId) -> Result<(), TransportError> {
        self.0.patch(record, origin).await
    }

    async fn remove(&self, kind: RecordKind, id: Uuid, origin: ParticipantId) -> Result<(), TransportError> {
        self.0.remove(kind, id, origin).await
    }

    async fn subscribe(&self, topic: Topic) -> Result<BoxStream<'static, Envelope>, TransportError> {
        self.0.subscribe(topic).await
    }
}

#[tokio::test]
async fn test_join_bounds_bulk_queries() {
    let config = SyncConfig {
        find_timeout_ms: 20,
        ..SyncConfig::default()
    };
    let store = Arc::new(MemoryStore::new());
    let session = SyncSession::new(
        Identity::new("alice", Some("token".to_string())),
        Arc::new(StalledQueries(store.clone())),
        Box::new(MemoryScene::new()),
        config,
    );

    let result = session.join().await;
    assert!(matches!(
        result,
        Err(SyncError::Transport(TransportError::Timeout(20)))
    ));
    // Nobody else may see a participant that never finished joining
    assert_eq!(store.record_count(RecordKind::Participant), 0);
}

/// Accepts everything except component creates.
#[derive(Debug)]
struct RejectingComponents(Arc<MemoryStore>);

#[async_trait]
impl Transport for RejectingComponents {
    async fn create(&self, record: Record, origin: ParticipantId) -> Result<(), TransportError> {
        match record {
            Record::Component(component) => Err(TransportError::Rejected(format!("component {}", component.id))),
            other => self.0.create(other, origin).await,
        }
    }

    async fn find(&self, kind: RecordKind) -> Result<Vec<Record>, TransportError> {
        self.0.find(kind).await
    }

    async fn patch(&self, record: Record, origin: ParticipantId) -> Result<(), TransportError> {
        self.0.patch(record, origin).await
    }

    async fn remove(&self, kind: RecordKind, id: Uuid, origin: ParticipantId) -> Result<(), TransportError> {
        self.0.remove(kind, id, origin).await
    }

    async fn subscribe(&self, topic: Topic) -> Result<BoxStream<'static, Envelope>, TransportError> {
        self.0.subscribe(topic).await
    }
}

#[tokio::test]
async fn test_failed_spawn_leaves_nothing_behind() {
    let store = Arc::new(MemoryStore::new());
    let alice = SyncSession::new(
        Identity::new("alice", Some("token".to_string())),
        Arc::new(RejectingComponents(store.clone())),
        Box::new(MemoryScene::new()),
        SyncConfig::default(),
    );
    alice.join().await.unwrap();

    let result = alice.spawn_entity("User Entity", avatar(Vec3::zero())).await;
    assert!(matches!(
        result,
        Err(SyncError::Transport(TransportError::Rejected(_)))
    ));

    // The entity record created before the failure is withdrawn again
    assert_eq!(store.record_count(RecordKind::Entity), 0);
    assert_eq!(store.record_count(RecordKind::Component), 0);

    let local = alice.snapshot().await;
    assert!(local.entities.is_empty());
    assert!(local.components.is_empty());
    assert!(alice.tick().await.unwrap().is_empty());
}
