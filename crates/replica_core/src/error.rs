//! Error types for the synchronization core.
//!
//! Two layers are distinguished: [`TransportError`] for failures reported by the shared
//! store, and [`SyncError`] for everything the core itself can reject. None of them is
//! fatal; callers log and continue with a stale local view.

use crate::payload::ComponentKind;
use crate::types::{ComponentId, EntityId};

/// Failures reported by a [`Transport`](crate::transport::Transport) implementation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    /// The store rejected the request
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The addressed record does not exist in the store
    #[error("Record not found: {0}")]
    NotFound(String),

    /// The request did not complete in time
    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    /// The transport is closed or unreachable
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by the synchronization core.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The local identity has no usable token; the session does no network activity
    #[error("Session is inert: {0}")]
    Inert(String),

    /// A component payload could not be decoded
    #[error("Malformed payload for component {component}: {reason}")]
    MalformedPayload {
        component: ComponentId,
        reason: String,
    },

    /// A patch tried to change the kind of an existing component
    #[error("Component {component} is a {expected} component, received {received}")]
    KindMismatch {
        component: ComponentId,
        expected: ComponentKind,
        received: ComponentKind,
    },

    /// An entity can carry at most one component of each kind
    #[error("Entity {entity} already has a {kind} component")]
    DuplicateKind { entity: EntityId, kind: ComponentKind },

    /// The session has already left or is leaving
    #[error("Session is shutting down")]
    ShuttingDown,

    /// A payload could not be encoded for the wire
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The shared store reported a failure
    #[error(transparent)]
    Transport(#[from] TransportError),
}
