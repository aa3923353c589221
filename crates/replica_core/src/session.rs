//! # Session Lifecycle Manager
//!
//! [`SyncSession`] ties one participant's [`SyncState`] to a [`Transport`]:
//!
//! - **join** registers the participant, subscribes to every topic, bulk-loads the store
//!   through the Apply Engine's create path and starts the inbound pump;
//! - **tick** runs one Outbound Sync Driver pass;
//! - **leave** retracts everything the participant owns, best-effort.
//!
//! The state sits behind a single async mutex shared by the tick path, the inbound pump and
//! the retry tasks, so exactly one of them mutates the directory at a time. Network calls are
//! never made while holding it.

use crate::apply::{ApplyOutcome, RetryOutcome};
use crate::config::SyncConfig;
use crate::directory::DirectorySnapshot;
use crate::error::{SyncError, TransportError};
use crate::outbound::{publish, TickReport};
use crate::payload::{ComponentKind, ComponentPayload};
use crate::records::{Change, ComponentRecord, EntityRecord, Envelope, ParticipantRecord, Record, RecordKind, Topic};
use crate::scene::Scene;
use crate::shutdown::ShutdownState;
use crate::state::{LocalComponent, SyncState};
use crate::stats::SyncStats;
use crate::transport::Transport;
use crate::types::{ComponentId, EntityId, LocalHandle, ParticipantId, Vec3};
use futures::future::join_all;
use futures::stream::{select_all, BoxStream, SelectAll, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Who the local participant is, as supplied by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub participant_id: ParticipantId,
    pub name: String,
    pub token: Option<String>,
}

impl Identity {
    pub fn new(name: impl Into<String>, token: Option<String>) -> Self {
        Self {
            participant_id: ParticipantId::new(),
            name: name.into(),
            token,
        }
    }

    /// A session without a usable token does no network activity.
    pub fn is_authenticated(&self) -> bool {
        self.token.as_deref().is_some_and(|token| !token.trim().is_empty())
    }
}

/// What the bulk load found on join.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JoinReport {
    pub entities_loaded: usize,
    pub components_loaded: usize,
    pub participants_loaded: usize,
    /// Components skipped because their entity was not in the entity query result
    pub components_skipped: usize,
}

/// Outcome of the best-effort retraction on leave.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LeaveReport {
    pub components_removed: usize,
    pub entities_removed: usize,
    pub participant_removed: bool,
    pub failures: Vec<TransportError>,
}

#[derive(Debug)]
struct SessionInner {
    identity: Identity,
    transport: Arc<dyn Transport>,
    config: SyncConfig,
    state: Mutex<SyncState>,
    shutdown: ShutdownState,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// One participant's synchronization context. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct SyncSession {
    inner: Arc<SessionInner>,
}

impl SyncSession {
    pub fn new(identity: Identity, transport: Arc<dyn Transport>, scene: Box<dyn Scene>, config: SyncConfig) -> Self {
        let state = SyncState::new(identity.participant_id, scene, &config);
        Self {
            inner: Arc::new(SessionInner {
                identity,
                transport,
                config,
                state: Mutex::new(state),
                shutdown: ShutdownState::new(),
                pump: Mutex::new(None),
            }),
        }
    }

    pub fn local(&self) -> ParticipantId {
        self.inner.identity.participant_id
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn is_inert(&self) -> bool {
        !self.inner.identity.is_authenticated()
    }

    pub fn shutdown_state(&self) -> &ShutdownState {
        &self.inner.shutdown
    }

    fn ensure_active(&self) -> Result<(), SyncError> {
        if self.is_inert() {
            return Err(SyncError::Inert(format!(
                "participant {} has no token",
                self.inner.identity.name
            )));
        }
        if self.inner.shutdown.is_leaving() {
            return Err(SyncError::ShuttingDown);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Join
    // ------------------------------------------------------------------

    /// Joins the shared store.
    ///
    /// Subscriptions are established before the bulk load so nothing created in between is
    /// missed; the overlap is absorbed by idempotent creates. If subscribing or loading fails
    /// the participant record is withdrawn again before the error is returned.
    pub async fn join(&self) -> Result<JoinReport, SyncError> {
        self.ensure_active()?;
        let identity = &self.inner.identity;
        let transport = &self.inner.transport;
        let local = identity.participant_id;

        transport
            .create(
                Record::Participant(ParticipantRecord {
                    id: local,
                    name: identity.name.clone(),
                    position: None,
                }),
                local,
            )
            .await?;

        let (mut inbound, report) = match self.connect().await {
            Ok(connected) => connected,
            Err(e) => {
                warn!(error = %e, "join failed, withdrawing participant record");
                if let Err(cleanup) = transport.remove(RecordKind::Participant, local.0, local).await {
                    warn!(error = %cleanup, "could not withdraw participant record");
                }
                return Err(e);
            }
        };

        let weak = Arc::downgrade(&self.inner);
        let pump = tokio::spawn(async move {
            while let Some(envelope) = inbound.next().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.shutdown.is_leaving() {
                    break;
                }
                inner.handle_inbound(envelope).await;
            }
            debug!("inbound pump stopped");
        });
        *self.inner.pump.lock().await = Some(pump);

        info!(
            "🔗 {} joined as {} ({} entities, {} components, {} participants)",
            identity.name,
            identity.participant_id,
            report.entities_loaded,
            report.components_loaded,
            report.participants_loaded
        );
        Ok(report)
    }

    async fn connect(&self) -> Result<(SelectAll<BoxStream<'static, Envelope>>, JoinReport), SyncError> {
        let mut streams = Vec::new();
        for topic in Topic::all() {
            streams.push(self.inner.transport.subscribe(topic).await?);
        }
        let inbound = select_all(streams);

        let report = self.bulk_load().await?;
        Ok((inbound, report))
    }

    async fn find_bounded(&self, kind: RecordKind) -> Result<Vec<Record>, SyncError> {
        let request = self.inner.transport.find(kind);
        let records = match self.inner.config.find_timeout() {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| TransportError::Timeout(self.inner.config.find_timeout_ms))??,
            None => request.await?,
        };
        Ok(records)
    }

    /// Reconciles the store's current content through the Apply Engine's create path.
    async fn bulk_load(&self) -> Result<JoinReport, SyncError> {
        let local = self.local();
        let entities: Vec<EntityRecord> = self
            .find_bounded(RecordKind::Entity)
            .await?
            .into_iter()
            .filter_map(|record| match record {
                Record::Entity(entity) => Some(entity),
                _ => None,
            })
            .collect();
        let components: Vec<ComponentRecord> = self
            .find_bounded(RecordKind::Component)
            .await?
            .into_iter()
            .filter_map(|record| match record {
                Record::Component(component) => Some(component),
                _ => None,
            })
            .collect();
        let participants: Vec<ParticipantRecord> = self
            .find_bounded(RecordKind::Participant)
            .await?
            .into_iter()
            .filter_map(|record| match record {
                Record::Participant(participant) if participant.id != local => Some(participant),
                _ => None,
            })
            .collect();

        let known: HashSet<EntityId> = entities.iter().map(|entity| entity.id).collect();
        let mut report = JoinReport::default();
        let mut state = self.inner.state.lock().await;

        for participant in participants {
            if let Ok(ApplyOutcome::Applied { .. }) =
                state.apply(Envelope::new(None, Change::ParticipantCreated(participant)))
            {
                report.participants_loaded += 1;
            }
        }

        let mut fresh = HashSet::new();
        for entity in entities {
            if state.directory.contains_entity(&entity.id) {
                continue;
            }
            let id = entity.id;
            if let Ok(ApplyOutcome::Applied { .. }) = state.apply(Envelope::new(None, Change::EntityCreated(entity))) {
                fresh.insert(id);
                report.entities_loaded += 1;
            }
        }

        for component in components {
            if !known.contains(&component.entity_id) {
                report.components_skipped += 1;
                continue;
            }
            if !fresh.contains(&component.entity_id) {
                continue;
            }
            if let Ok(ApplyOutcome::Applied { .. }) =
                state.apply(Envelope::new(None, Change::ComponentCreated(component)))
            {
                report.components_loaded += 1;
            }
        }

        Ok(report)
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Applies one change notification as if it had arrived on a subscription.
    ///
    /// Returns `None` once the session is leaving or when the event was rejected.
    pub async fn handle_inbound(&self, envelope: Envelope) -> Option<ApplyOutcome> {
        self.inner.handle_inbound(envelope).await
    }

    // ------------------------------------------------------------------
    // Local actions
    // ------------------------------------------------------------------

    /// Creates an entity owned by the local participant and publishes it, entity first.
    pub async fn spawn_entity(&self, name: &str, components: Vec<LocalComponent>) -> Result<EntityId, SyncError> {
        self.ensure_active()?;
        let created = self.inner.state.lock().await.spawn_owned(name, &components)?;
        self.publish_created(created).await
    }

    /// Creates an unowned environment entity. Its components are remote everywhere, so no
    /// participant publishes patches for them and leaving does not retract them.
    pub async fn spawn_environment(&self, name: &str, components: Vec<LocalComponent>) -> Result<EntityId, SyncError> {
        self.ensure_active()?;
        let created = self.inner.state.lock().await.spawn_environment(name, &components)?;
        self.publish_created(created).await
    }

    /// Creates the entity record, then each component record. On the first failure the
    /// records already created are removed and the local entity is discarded.
    async fn publish_created(&self, (entity, components): (EntityRecord, Vec<ComponentRecord>)) -> Result<EntityId, SyncError> {
        let local = self.local();
        let id = entity.id;
        let transport = self.inner.transport.as_ref();

        let records = std::iter::once(Record::Entity(entity)).chain(components.into_iter().map(Record::Component));
        let mut created = Vec::new();
        for record in records {
            let key = (record.kind(), record.id());
            if let Err(e) = transport.create(record, local).await {
                warn!(entity = %id, error = %e, "publishing new entity failed, rolling back");
                for (kind, record_id) in created.into_iter().rev() {
                    if let Err(cleanup) = transport.remove(kind, record_id, local).await {
                        warn!(%kind, id = %record_id, error = %cleanup, "rollback removal failed");
                    }
                }
                self.inner.state.lock().await.discard_local(&id);
                return Err(e.into());
            }
            created.push(key);
        }
        Ok(id)
    }

    /// Publishes the participant's last known position.
    pub async fn report_position(&self, position: Vec3) -> Result<(), SyncError> {
        self.ensure_active()?;
        let identity = &self.inner.identity;
        self.inner
            .transport
            .patch(
                Record::Participant(ParticipantRecord {
                    id: identity.participant_id,
                    name: identity.name.clone(),
                    position: Some(position),
                }),
                identity.participant_id,
            )
            .await?;
        Ok(())
    }

    /// Runs one Outbound Sync Driver pass. A no-op for inert or leaving sessions.
    pub async fn tick(&self) -> Result<TickReport, SyncError> {
        if self.ensure_active().is_err() {
            return Ok(TickReport::default());
        }

        let patches = {
            let mut state = self.inner.state.lock().await;
            state.expire_pending(Instant::now());
            state.collect_outbound()?
        };

        let report = publish(self.inner.transport.as_ref(), self.local(), patches).await;

        let mut state = self.inner.state.lock().await;
        state.stats.ticks += 1;
        state.stats.patches_published += report.published.len() as u64;
        state.stats.publish_failures += report.failures.len() as u64;
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Runs `f` against the live scene, e.g. a simulation system writing owned components.
    pub async fn with_scene<R>(&self, f: impl FnOnce(&mut dyn Scene) -> R) -> R {
        let mut state = self.inner.state.lock().await;
        f(state.scene.as_mut())
    }

    pub async fn handle_of(&self, entity: &EntityId) -> Option<LocalHandle> {
        let state = self.inner.state.lock().await;
        state.directory.lookup_entity(entity).map(|entity| entity.handle)
    }

    pub async fn live_component(&self, entity: &EntityId, kind: ComponentKind) -> Option<ComponentPayload> {
        self.inner.state.lock().await.live_component(entity, kind)
    }

    pub async fn snapshot(&self) -> DirectorySnapshot {
        self.inner.state.lock().await.directory.snapshot()
    }

    pub async fn pending_len(&self) -> usize {
        self.inner.state.lock().await.pending.len()
    }

    pub async fn stats(&self) -> SyncStats {
        self.inner.state.lock().await.stats.clone()
    }

    // ------------------------------------------------------------------
    // Leave
    // ------------------------------------------------------------------

    /// Stops syncing and retracts every owned component, entity and the participant record.
    ///
    /// Best-effort: failures are collected in the report and never retried.
    pub async fn leave(&self) -> Result<LeaveReport, SyncError> {
        if self.is_inert() {
            return Ok(LeaveReport::default());
        }
        if !self.inner.shutdown.begin_leave() {
            return Err(SyncError::ShuttingDown);
        }

        if let Some(pump) = self.inner.pump.lock().await.take() {
            pump.abort();
        }

        let local = self.local();
        let (entities, components) = {
            let state = self.inner.state.lock().await;
            (state.directory.owned_entities(local), state.directory.owned_components())
        };

        let transport = self.inner.transport.as_ref();
        let mut report = LeaveReport::default();

        let removals = components
            .iter()
            .map(|id| transport.remove(RecordKind::Component, id.0, local));
        for result in join_all(removals).await {
            match result {
                Ok(()) => report.components_removed += 1,
                Err(e) => report.failures.push(e),
            }
        }

        let removals = entities
            .iter()
            .map(|id| transport.remove(RecordKind::Entity, id.0, local));
        for result in join_all(removals).await {
            match result {
                Ok(()) => report.entities_removed += 1,
                Err(e) => report.failures.push(e),
            }
        }

        match transport.remove(RecordKind::Participant, local.0, local).await {
            Ok(()) => report.participant_removed = true,
            Err(e) => report.failures.push(e),
        }

        for failure in &report.failures {
            warn!(error = %failure, "retraction failed on leave");
        }
        info!(
            "👋 {} left: {} entities and {} components retracted, {} failures",
            self.inner.identity.name,
            report.entities_removed,
            report.components_removed,
            report.failures.len()
        );
        self.inner.shutdown.mark_closed();
        Ok(report)
    }
}

impl SessionInner {
    async fn handle_inbound(self: &Arc<Self>, envelope: Envelope) -> Option<ApplyOutcome> {
        if self.shutdown.is_leaving() {
            return None;
        }

        let outcome = {
            let mut state = self.state.lock().await;
            let outcome = state.apply(envelope);
            state.expire_pending(Instant::now());
            outcome.ok()?
        };

        if let ApplyOutcome::Deferred { component, .. } = outcome {
            self.schedule_retry(component);
        }
        Some(outcome)
    }

    /// Re-attempts a held component after each backoff until it is applied, dropped or gone.
    fn schedule_retry(self: &Arc<Self>, component: ComponentId) {
        let weak = Arc::downgrade(self);
        let backoff = self.config.retry_backoff();

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(backoff).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if inner.shutdown.is_leaving() {
                    return;
                }

                let outcome = inner.state.lock().await.retry_pending(&component);
                match outcome {
                    RetryOutcome::StillPending { attempts } => {
                        debug!(%component, attempts, "parent entity still unknown");
                    }
                    outcome => {
                        debug!(%component, ?outcome, "retry finished");
                        return;
                    }
                }
            }
        });
    }
}
