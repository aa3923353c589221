//! # Pending Buffer
//!
//! Holds component-created events whose parent entity is not known yet, keyed by the
//! missing entity id.
//!
//! ```text
//! Unresolved ──(parent created)──▶ Resolved ──(applied)──▶ Applied
//!     │
//!     └──(attempts exhausted / ttl elapsed)──▶ Dropped
//! ```
//!
//! The buffer is bounded twice: every entry has a maximum number of retry attempts and a
//! time-to-live, so a parent that never arrives cannot leak memory.

use crate::records::ComponentRecord;
use crate::types::{ComponentId, EntityId, ParticipantId};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingState {
    Unresolved,
    Resolved,
    Applied,
    Dropped,
}

/// A held component-created event.
#[derive(Debug, Clone)]
pub struct PendingComponent {
    pub record: ComponentRecord,
    pub origin: Option<ParticipantId>,
    pub attempts: u32,
    pub first_seen: Instant,
    pub state: PendingState,
}

#[derive(Debug)]
pub struct PendingBuffer {
    by_entity: HashMap<EntityId, Vec<ComponentId>>,
    entries: HashMap<ComponentId, PendingComponent>,
    max_attempts: u32,
    ttl: Duration,
}

impl PendingBuffer {
    pub fn new(max_attempts: u32, ttl: Duration) -> Self {
        Self {
            by_entity: HashMap::new(),
            entries: HashMap::new(),
            max_attempts,
            ttl,
        }
    }

    /// Holds `record` until its parent entity appears.
    ///
    /// Returns `false` if the component is already held (duplicate delivery).
    pub fn hold(&mut self, record: ComponentRecord, origin: Option<ParticipantId>) -> bool {
        if self.entries.contains_key(&record.id) {
            return false;
        }

        self.by_entity.entry(record.entity_id).or_default().push(record.id);
        self.entries.insert(
            record.id,
            PendingComponent {
                record,
                origin,
                attempts: 0,
                first_seen: Instant::now(),
                state: PendingState::Unresolved,
            },
        );
        true
    }

    pub fn contains(&self, component: &ComponentId) -> bool {
        self.entries.contains_key(component)
    }

    pub fn get(&self, component: &ComponentId) -> Option<&PendingComponent> {
        self.entries.get(component)
    }

    /// Takes every entry waiting on `entity`, marked [`PendingState::Resolved`].
    pub fn drain(&mut self, entity: &EntityId) -> Vec<PendingComponent> {
        let Some(ids) = self.by_entity.remove(entity) else {
            return Vec::new();
        };

        ids.into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .map(|mut pending| {
                pending.state = PendingState::Resolved;
                pending
            })
            .collect()
    }

    /// Counts a failed retry. Once the attempt budget is spent the entry is removed and
    /// `Dropped` is returned. `None` means the entry is no longer held.
    pub fn record_attempt(&mut self, component: &ComponentId) -> Option<PendingState> {
        let pending = self.entries.get_mut(component)?;
        pending.attempts += 1;

        if pending.attempts >= self.max_attempts {
            self.remove_component(component);
            return Some(PendingState::Dropped);
        }
        Some(PendingState::Unresolved)
    }

    /// Evicts entries older than the configured ttl.
    pub fn expire(&mut self, now: Instant) -> Vec<PendingComponent> {
        let expired: Vec<ComponentId> = self
            .entries
            .values()
            .filter(|pending| now.saturating_duration_since(pending.first_seen) >= self.ttl)
            .map(|pending| pending.record.id)
            .collect();

        expired
            .iter()
            .filter_map(|id| self.remove_component(id))
            .map(|mut pending| {
                pending.state = PendingState::Dropped;
                pending
            })
            .collect()
    }

    /// Replaces the held payload so the newest value wins once the parent arrives.
    pub fn update_payload(&mut self, component: &ComponentId, data: Value) -> bool {
        match self.entries.get_mut(component) {
            Some(pending) => {
                pending.record.data = data;
                true
            }
            None => false,
        }
    }

    pub fn remove_component(&mut self, component: &ComponentId) -> Option<PendingComponent> {
        let pending = self.entries.remove(component)?;
        if let Some(ids) = self.by_entity.get_mut(&pending.record.entity_id) {
            ids.retain(|id| id != component);
            if ids.is_empty() {
                self.by_entity.remove(&pending.record.entity_id);
            }
        }
        Some(pending)
    }

    /// Forgets everything waiting on `entity`.
    pub fn discard_entity(&mut self, entity: &EntityId) -> Vec<PendingComponent> {
        self.drain(entity)
            .into_iter()
            .map(|mut pending| {
                pending.state = PendingState::Dropped;
                pending
            })
            .collect()
    }

    pub fn waiting_on(&self, entity: &EntityId) -> usize {
        self.by_entity.get(entity).map(|ids| ids.len()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
