//! # Replica Core
//!
//! Keeps a local entity/component scene consistent with a shared, multi-writer realtime
//! store reached over an unordered, at-least-once publish/subscribe transport.
//!
//! ## Core Features
//!
//! - **Directory**: remote id → local state for entities, components and participants
//! - **Ownership**: components of entities the local participant controls are `Owned`
//!   (write-only outward), everything else is `Remote` (update-only inward)
//! - **Apply Engine**: idempotent creates, out-of-order parents held in a bounded pending
//!   buffer, origin-tagged self-echo suppression
//! - **Outbound Sync Driver**: one patch per changed owned component per tick
//! - **Session lifecycle**: bulk load on join, best-effort retraction on leave
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use replica_core::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), SyncError> {
//! let store = Arc::new(MemoryStore::new());
//! let session = SyncSession::new(
//!     Identity::new("alice", Some("token".to_string())),
//!     store,
//!     Box::new(MemoryScene::new()),
//!     SyncConfig::default(),
//! );
//!
//! session.join().await?;
//! let avatar = session
//!     .spawn_entity(
//!         "User Entity",
//!         vec![LocalComponent::networked(ComponentPayload::Position(Vec3::new(0.0, 0.0, 40.0)))],
//!     )
//!     .await?;
//!
//! if let Some(handle) = session.handle_of(&avatar).await {
//!     session
//!         .with_scene(|scene| {
//!             if let Some(ComponentPayload::Position(p)) = scene.component_mut(handle, ComponentKind::Position) {
//!                 p.x += 1.0;
//!             }
//!         })
//!         .await;
//! }
//! session.tick().await?;
//! session.leave().await?;
//! # Ok(())
//! # }
//! ```

// scenario tests
#[cfg(test)]
mod tests;

pub mod apply;
pub mod config;
pub mod directory;
pub mod error;
pub mod outbound;
pub mod ownership;
pub mod payload;
pub mod pending;
pub mod records;
pub mod scene;
pub mod session;
pub mod shutdown;
pub mod state;
pub mod stats;
pub mod transport;
pub mod types;

pub use apply::{ApplyOutcome, IgnoreReason, RetryOutcome};
pub use config::SyncConfig;
pub use directory::{Component, Directory, DirectorySnapshot, Entity, Participant, UpsertOutcome};
pub use error::{SyncError, TransportError};
pub use outbound::{publish, TickReport};
pub use ownership::{classify, Ownership};
pub use payload::{decode_payload, encode_payload, ComponentKind, ComponentPayload};
pub use pending::{PendingBuffer, PendingComponent, PendingState};
pub use records::{
    Action, Change, ComponentRecord, EntityRecord, Envelope, ParticipantRecord, Record, RecordKind, Topic,
};
pub use scene::{MemoryScene, Scene};
pub use session::{Identity, JoinReport, LeaveReport, SyncSession};
pub use shutdown::ShutdownState;
pub use state::{LocalComponent, SyncState};
pub use stats::SyncStats;
pub use transport::{MemoryStore, Transport};
pub use types::{ComponentId, EntityId, LocalHandle, ParticipantId, Transform, Vec3};
