//! Ownership classification of networked components.
//!
//! A component is [`Ownership::Owned`] when its parent entity is controlled by the local
//! participant. Owned components are written outward only; remote ones are updated inward
//! only. Classification happens once, when the component is applied, and never changes.

use crate::types::ParticipantId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ownership {
    /// Authoritative local copy, published on change
    Owned,
    /// Read-only mirror of another participant's (or the environment's) state
    Remote,
}

impl Ownership {
    pub fn is_owned(self) -> bool {
        matches!(self, Ownership::Owned)
    }
}

/// Returns [`Ownership::Owned`] iff `entity_owner` is the local participant.
pub fn classify(entity_owner: Option<ParticipantId>, local: ParticipantId) -> Ownership {
    match entity_owner {
        Some(owner) if owner == local => Ownership::Owned,
        _ => Ownership::Remote,
    }
}
