//! # Core Type Definitions
//!
//! Identifiers and spatial values shared by every part of the synchronization core.
//!
//! ## Key Types
//!
//! - [`EntityId`], [`ComponentId`], [`ParticipantId`] - stable cross-participant identifiers
//! - [`LocalHandle`] - process-local scene handle, never sent over the wire
//! - [`Vec3`] / [`Transform`] - spatial payload values
//!
//! Remote identifiers are UUID wrappers so an entity id can never be passed where a
//! component id is expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Remote identifiers
// ============================================================================

macro_rules! remote_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random identifier using UUID v4.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Returns the raw UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

remote_id!(
    /// Stable identifier of a scene-graph entity, assigned once by its creator.
    ///
    /// ```rust
    /// use replica_core::EntityId;
    ///
    /// let id: EntityId = "550e8400-e29b-41d4-a716-446655440000".parse()?;
    /// println!("Entity: {}", id);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    EntityId
);

remote_id!(
    /// Stable identifier of a component instance attached to exactly one entity.
    ComponentId
);

remote_id!(
    /// Identifier of a connected participant (user).
    ParticipantId
);

/// Process-local handle of a live scene entity.
///
/// Handles are ephemeral: two participants will generally use different handles for the
/// same [`EntityId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalHandle(pub u64);

impl std::fmt::Display for LocalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Spatial values
// ============================================================================

/// Represents a 3D vector with double-precision components.
///
/// # Examples
///
/// ```rust
/// use replica_core::Vec3;
///
/// let spawn = Vec3::new(0.0, 0.0, 40.0);
/// assert_eq!(spawn.distance(Vec3::zero()), 40.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    /// X coordinate (typically east-west axis)
    pub x: f64,
    /// Y coordinate (typically vertical axis)
    pub y: f64,
    /// Z coordinate (typically north-south axis)
    pub z: f64,
}

impl Vec3 {
    /// Creates a new Vec3 with the specified coordinates.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Creates a zero vector (0, 0, 0).
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Calculates the Euclidean distance to another Vec3.
    pub fn distance(&self, other: Vec3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl Default for Vec3 {
    fn default() -> Self {
        Self::zero()
    }
}

/// Spatial transform of an entity: position plus Euler rotation in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Vec3,
}

impl Transform {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            rotation: Vec3::zero(),
        }
    }
}
