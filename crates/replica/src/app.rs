//! Main application logic and lifecycle management.
//!
//! The node hosts one in-memory store and a [`Room`] of simulated participants. Each
//! participant runs the full join → tick → leave lifecycle against the store: its avatar
//! moves along a circle every tick, participant 0 also places a shared box that it spins in
//! its own scene only, and a periodic report shows whether every participant sees the same
//! directory.

use crate::{
    cli::CliArgs,
    config::AppConfig,
    logging::display_banner,
    signals::{wait_for_shutdown_signal, wait_for_shutdown_signal_silent},
};
use futures::future::join_all;
use replica_core::{
    ComponentId, ComponentKind, ComponentPayload, DirectorySnapshot, EntityId, Identity, LocalComponent,
    MemoryScene, MemoryStore, SyncConfig, SyncError, SyncSession, SyncStats, Transform, Vec3,
};
use std::collections::BTreeSet;
use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const AVATAR_RADIUS: f64 = 5.0;
const AVATAR_HEIGHT: f64 = 40.0;
const AVATAR_SPEED: f64 = 0.05;
const BOX_SPIN: f64 = 0.02;

/// One simulated participant and the entities it drives.
#[derive(Debug)]
struct Member {
    index: usize,
    session: SyncSession,
    avatar: EntityId,
    spinning_box: Option<EntityId>,
}

/// Agreement between participants' directories at one point in time.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConvergenceReport {
    /// Entities known to every participant
    pub shared_entities: usize,
    /// Components known to every participant with identical payloads
    pub converged_components: usize,
    /// Components missing somewhere or carrying different payloads
    pub diverged_components: usize,
}

impl ConvergenceReport {
    pub fn is_converged(&self) -> bool {
        self.diverged_components == 0
    }
}

/// Compares directory snapshots taken from different participants.
pub fn convergence(snapshots: &[DirectorySnapshot]) -> ConvergenceReport {
    let Some((first, rest)) = snapshots.split_first() else {
        return ConvergenceReport::default();
    };

    let shared_entities = first
        .entities
        .keys()
        .filter(|id| rest.iter().all(|snapshot| snapshot.entities.contains_key(id)))
        .count();

    let all_components: BTreeSet<ComponentId> = snapshots
        .iter()
        .flat_map(|snapshot| snapshot.components.keys().copied())
        .collect();

    let mut report = ConvergenceReport {
        shared_entities,
        ..ConvergenceReport::default()
    };
    for id in all_components {
        let reference = first.components.get(&id);
        let agreed = reference.is_some() && rest.iter().all(|snapshot| snapshot.components.get(&id) == reference);
        if agreed {
            report.converged_components += 1;
        } else {
            report.diverged_components += 1;
        }
    }
    report
}

/// Position of participant `index` of `count` at simulation step `step`.
fn avatar_position(index: usize, count: usize, step: u64) -> Vec3 {
    let phase = TAU * index as f64 / count.max(1) as f64;
    let angle = phase + AVATAR_SPEED * step as f64;
    Vec3::new(AVATAR_RADIUS * angle.cos(), 0.0, AVATAR_HEIGHT + AVATAR_RADIUS * angle.sin())
}

/// A room of simulated participants sharing one store.
#[derive(Debug)]
pub struct Room {
    members: Vec<Member>,
    step: u64,
}

impl Room {
    /// Joins `participants` sessions to `store`, each spawning its avatar.
    pub async fn open(store: Arc<MemoryStore>, participants: usize, sync: &SyncConfig) -> Result<Self, SyncError> {
        let mut members = Vec::with_capacity(participants);

        for index in 0..participants {
            let name = format!("participant-{index}");
            let identity = Identity::new(name.clone(), Some(format!("{name}-token")));
            let session = SyncSession::new(identity, store.clone(), Box::new(MemoryScene::new()), sync.clone());
            session.join().await?;

            let start = avatar_position(index, participants, 0);
            let avatar = session
                .spawn_entity(
                    "User Entity",
                    vec![
                        LocalComponent::networked(ComponentPayload::Position(start)),
                        // Camera rig follows the avatar locally only
                        LocalComponent::local_only(ComponentPayload::Transform(Transform::at(start))),
                    ],
                )
                .await?;

            let spinning_box = if index == 0 {
                let id = session
                    .spawn_environment(
                        "Rotating Box",
                        vec![LocalComponent::networked(ComponentPayload::Transform(Transform::at(
                            Vec3::new(0.0, 0.0, AVATAR_HEIGHT),
                        )))],
                    )
                    .await?;
                Some(id)
            } else {
                None
            };

            members.push(Member {
                index,
                session,
                avatar,
                spinning_box,
            });
        }

        Ok(Self { members, step: 0 })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Advances the simulation one step and runs every participant's outbound pass.
    pub async fn step(&mut self) {
        self.step += 1;
        let count = self.members.len();

        for member in &self.members {
            let position = avatar_position(member.index, count, self.step);
            if let Some(handle) = member.session.handle_of(&member.avatar).await {
                member
                    .session
                    .with_scene(|scene| {
                        if let Some(ComponentPayload::Position(p)) = scene.component_mut(handle, ComponentKind::Position) {
                            *p = position;
                        }
                        if let Some(ComponentPayload::Transform(camera)) =
                            scene.component_mut(handle, ComponentKind::Transform)
                        {
                            camera.position = position;
                        }
                    })
                    .await;
            }

            if let Some(spinning_box) = member.spinning_box {
                if let Some(handle) = member.session.handle_of(&spinning_box).await {
                    member
                        .session
                        .with_scene(|scene| {
                            if let Some(ComponentPayload::Transform(t)) =
                                scene.component_mut(handle, ComponentKind::Transform)
                            {
                                t.rotation.x = (t.rotation.x + BOX_SPIN) % TAU;
                                t.rotation.y = (t.rotation.y + BOX_SPIN) % TAU;
                            }
                        })
                        .await;
                }
            }
        }

        let ticks = join_all(self.members.iter().map(|member| member.session.tick())).await;
        for (member, result) in self.members.iter().zip(ticks) {
            if let Err(e) = result {
                warn!("⚠️ participant-{} tick failed: {}", member.index, e);
            }
        }
    }

    /// Publishes every participant's last known position.
    pub async fn report_positions(&self) {
        let count = self.members.len();
        for member in &self.members {
            let position = avatar_position(member.index, count, self.step);
            if let Err(e) = member.session.report_position(position).await {
                warn!("⚠️ participant-{} position report failed: {}", member.index, e);
            }
        }
    }

    pub async fn convergence(&self) -> ConvergenceReport {
        let snapshots = join_all(self.members.iter().map(|member| member.session.snapshot())).await;
        convergence(&snapshots)
    }

    pub async fn stats(&self) -> Vec<SyncStats> {
        join_all(self.members.iter().map(|member| member.session.stats())).await
    }

    /// Every participant leaves, retracting what it owns.
    pub async fn close(self) {
        for member in self.members {
            match member.session.leave().await {
                Ok(report) if report.failures.is_empty() => {}
                Ok(report) => warn!(
                    "⚠️ participant-{} left with {} failed retractions",
                    member.index,
                    report.failures.len()
                ),
                Err(e) => error!("❌ participant-{} failed to leave: {}", member.index, e),
            }
        }
    }
}

/// Main application struct.
pub struct Application {
    config: AppConfig,
    store: Arc<MemoryStore>,
}

impl Application {
    /// Loads configuration, applies CLI overrides and validates the result.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(participants) = args.participants {
            config.session.participants = participants;
        }

        if let Some(tick_ms) = args.tick_ms {
            config.session.tick_interval_ms = tick_ms;
        }

        if let Some(run_for) = args.run_for_secs {
            config.session.run_for_secs = run_for;
        }

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }

        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        } else {
            info!("✅ Configuration loaded and validated successfully");
        }

        display_banner();

        Ok(Self {
            config,
            store: Arc::new(MemoryStore::new()),
        })
    }

    /// Runs the room until a shutdown signal or the configured run time elapses.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        self.log_configuration_summary();
        let session = &self.config.session;

        let mut room = Room::open(self.store.clone(), session.participants, &self.config.sync).await?;
        info!("✅ {} participants joined the room", room.len());
        info!("🛑 Press Ctrl+C to leave gracefully");

        let mut ticks = tokio::time::interval(Duration::from_millis(session.tick_interval_ms));
        ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let report_every = (session.report_interval_secs > 0).then(|| Duration::from_secs(session.report_interval_secs));
        let mut reports = tokio::time::interval(report_every.unwrap_or(Duration::from_secs(3600)));
        // The first tick of an interval completes immediately
        reports.tick().await;

        let run_for = session.run_for_secs;
        let deadline = async move {
            if run_for > 0 {
                tokio::time::sleep(Duration::from_secs(run_for)).await;
                info!("⏰ Run time of {}s elapsed - leaving the room", run_for);
            } else {
                futures::future::pending::<()>().await;
            }
        };
        tokio::pin!(deadline);

        let signal = wait_for_shutdown_signal();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                _ = ticks.tick() => room.step().await,
                _ = reports.tick(), if report_every.is_some() => {
                    room.report_positions().await;
                    log_convergence(&room).await;
                }
                result = &mut signal => {
                    result?;
                    break;
                }
                _ = &mut deadline => break,
            }
        }

        // A second signal while leaving exits immediately
        tokio::spawn(async move {
            if let Err(e) = wait_for_shutdown_signal_silent().await {
                error!("Failed to set up forced shutdown signal handler: {e}");
                return;
            }

            warn!("Shutdown signal received again! Exiting without cleanup.");
            std::process::exit(1);
        });

        log_convergence(&room).await;
        log_final_statistics(&room.stats().await);

        room.close().await;
        info!(
            "🧹 Store after leave: {} entities, {} components, {} participants",
            self.store.record_count(replica_core::RecordKind::Entity),
            self.store.record_count(replica_core::RecordKind::Component),
            self.store.record_count(replica_core::RecordKind::Participant)
        );
        info!("✅ Replica node shutdown complete");
        Ok(())
    }

    fn log_configuration_summary(&self) {
        let session = &self.config.session;
        let sync = &self.config.sync;
        info!("📋 Configuration Summary:");
        info!("  👥 Participants: {}", session.participants);
        info!("  ⏱️ Tick interval: {}ms", session.tick_interval_ms);
        info!(
            "  🔁 Pending retry: every {}ms, {} attempts, {}ms ttl",
            sync.retry_backoff_ms, sync.max_retry_attempts, sync.pending_ttl_ms
        );
        info!("  ⌛ Bulk query timeout: {}ms", sync.find_timeout_ms);
        if session.run_for_secs > 0 {
            info!("  🏁 Leaving after {}s", session.run_for_secs);
        }
    }
}

async fn log_convergence(room: &Room) {
    let report = room.convergence().await;
    if report.is_converged() {
        info!(
            "📊 Converged - {} shared entities, {} components identical everywhere",
            report.shared_entities, report.converged_components
        );
    } else {
        info!(
            "📊 Converging - {} components identical, {} in flight",
            report.converged_components, report.diverged_components
        );
    }
}

fn log_final_statistics(stats: &[SyncStats]) {
    info!("📊 Final Statistics:");
    for (index, stats) in stats.iter().enumerate() {
        info!(
            "  - participant-{}: {} applied, {} published, {} echoes suppressed, {} deferred ({} resolved, {} dropped)",
            index,
            stats.events_applied,
            stats.patches_published,
            stats.echoes_suppressed,
            stats.components_deferred,
            stats.components_resolved,
            stats.components_dropped
        );
    }
}
