//! # Component Payloads
//!
//! Every networked component carries an explicitly tagged payload. The `kind` discriminant
//! is decided when the component is created and travels with the payload on the wire:
//!
//! ```json
//! {"kind":"position","x":0.0,"y":0.0,"z":40.0}
//! {"kind":"transform","position":{"x":0.0,"y":0.0,"z":0.0},"rotation":{"x":0.5,"y":0.1,"z":0.0}}
//! ```
//!
//! Payloads are always published as encoded JSON text. Receivers must accept both encoded
//! text and already-structured values, see [`decode_payload`].

use crate::error::SyncError;
use crate::types::{ComponentId, Transform, Vec3};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminant of a component payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Transform,
    Position,
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentKind::Transform => write!(f, "transform"),
            ComponentKind::Position => write!(f, "position"),
        }
    }
}

/// Typed component data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComponentPayload {
    /// Full spatial transform (rotating scenery, props)
    Transform(Transform),
    /// Bare position (participant avatars)
    Position(Vec3),
}

impl ComponentPayload {
    pub fn kind(&self) -> ComponentKind {
        match self {
            ComponentPayload::Transform(_) => ComponentKind::Transform,
            ComponentPayload::Position(_) => ComponentKind::Position,
        }
    }

    /// Default value used when a live component of `kind` is created on demand.
    pub fn default_for(kind: ComponentKind) -> Self {
        match kind {
            ComponentKind::Transform => ComponentPayload::Transform(Transform::default()),
            ComponentKind::Position => ComponentPayload::Position(Vec3::zero()),
        }
    }

    /// Position carried by the payload, whatever its kind.
    pub fn position(&self) -> Vec3 {
        match self {
            ComponentPayload::Transform(transform) => transform.position,
            ComponentPayload::Position(position) => *position,
        }
    }

    /// Copies every field of `other` into `self`.
    ///
    /// Returns `false` and leaves `self` untouched when the kinds differ.
    pub fn merge(&mut self, other: &ComponentPayload) -> bool {
        if self.kind() != other.kind() {
            return false;
        }
        *self = *other;
        true
    }
}

/// Decodes a payload received from the store.
///
/// `data` may be encoded JSON text or an already-structured JSON value.
pub fn decode_payload(component: ComponentId, data: &Value) -> Result<ComponentPayload, SyncError> {
    let decoded = match data {
        Value::String(text) => serde_json::from_str(text),
        structured => ComponentPayload::deserialize(structured),
    };

    decoded.map_err(|e| SyncError::MalformedPayload {
        component,
        reason: e.to_string(),
    })
}

/// Encodes a payload for the wire as JSON text.
pub fn encode_payload(payload: &ComponentPayload) -> Result<Value, SyncError> {
    Ok(Value::String(serde_json::to_string(payload)?))
}
