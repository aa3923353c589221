/// Statistics tracking for a synchronization session
use serde::{Deserialize, Serialize};

/// Counters describing what a session has done since it was created
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Inbound events that changed the directory or scene
    pub events_applied: u64,
    /// Component creations held for a missing parent entity
    pub components_deferred: u64,
    /// Held components that were eventually applied
    pub components_resolved: u64,
    /// Held components dropped after exhausting retries or their ttl
    pub components_dropped: u64,
    /// Events ignored because they echoed a local write
    pub echoes_suppressed: u64,
    /// Repeated creations ignored
    pub duplicates_ignored: u64,
    /// Events dropped because their payload could not be decoded
    pub malformed_dropped: u64,
    /// Outbound patches accepted by the store
    pub patches_published: u64,
    /// Outbound requests the store rejected
    pub publish_failures: u64,
    /// Completed outbound sync passes
    pub ticks: u64,
}
