//! # Apply Engine
//!
//! Ingests inbound change notifications and mutates the directory and the live scene.
//!
//! ## Rules
//!
//! - **entity-created**: inserted once (repeats are [`ApplyOutcome::Duplicate`]), then every
//!   component waiting on it in the pending buffer is applied.
//! - **component-created**: payload decoded first; if the parent entity is unknown the event is
//!   held in the pending buffer and [`ApplyOutcome::Deferred`] is returned so the caller can
//!   schedule a retry.
//! - **component-patched**: only applied to [`Ownership::Remote`] components. A patch aimed at
//!   an owned component is never applied, whoever sent it.
//! - **\*-removed**: unconditional; removing an entity cascades to its components.
//! - **participant-\***: directory bookkeeping only.
//!
//! Any create or patch whose envelope origin is the local participant is an echo of our own
//! write and is ignored.

use crate::directory::{Component, Entity, Participant, UpsertOutcome};
use crate::error::SyncError;
use crate::ownership::{classify, Ownership};
use crate::payload::{decode_payload, ComponentPayload};
use crate::pending::{PendingComponent, PendingState};
use crate::records::{Change, ComponentRecord, EntityRecord, Envelope, ParticipantRecord};
use crate::state::SyncState;
use crate::types::{ComponentId, EntityId, ParticipantId};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Why an event changed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownEntity,
    UnknownComponent,
    UnknownParticipant,
    /// Patch addressed to a component this participant is authoritative for
    OwnedComponent,
    /// The entity already carries a different component of the same kind
    KindTaken,
}

/// What applying one envelope did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// State changed; `resolved` lists held components applied as a consequence
    Applied { resolved: Vec<ComponentId> },
    /// Held until `waiting_on` is created
    Deferred { component: ComponentId, waiting_on: EntityId },
    /// A patch replaced the payload of a still-held component
    PendingUpdated { component: ComponentId },
    Duplicate,
    SelfEcho,
    Ignored(IgnoreReason),
    /// Removal applied; `cascaded` counts dependent components removed with it
    Removed { cascaded: usize },
}

impl ApplyOutcome {
    fn applied() -> Self {
        ApplyOutcome::Applied { resolved: Vec::new() }
    }
}

/// Result of re-attempting a held component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Applied,
    StillPending { attempts: u32 },
    Dropped,
    /// Already resolved, removed or dropped by someone else
    Gone,
}

impl SyncState {
    /// Applies one inbound envelope.
    ///
    /// Malformed payloads and kind mismatches are returned as errors after being counted;
    /// they never leave the state half-updated.
    pub fn apply(&mut self, envelope: Envelope) -> Result<ApplyOutcome, SyncError> {
        let Envelope { origin, change } = envelope;
        let topic = change.topic();

        let result = match change {
            Change::EntityCreated(record) => Ok(self.apply_entity_created(record, origin)),
            Change::EntityPatched(record) => Ok(self.apply_entity_patched(record, origin)),
            Change::EntityRemoved { id } => Ok(self.apply_entity_removed(id)),
            Change::ComponentCreated(record) => self.apply_component_created(record, origin),
            Change::ComponentPatched(record) => self.apply_component_patched(record, origin),
            Change::ComponentRemoved { id } => Ok(self.apply_component_removed(id)),
            Change::ParticipantCreated(record) | Change::ParticipantPatched(record) => {
                Ok(self.apply_participant_upsert(record, origin))
            }
            Change::ParticipantRemoved { id } => Ok(self.apply_participant_removed(id)),
        };

        match &result {
            Ok(outcome) => {
                self.record_outcome(outcome);
                debug!(%topic, ?origin, ?outcome, "applied inbound event");
            }
            Err(SyncError::MalformedPayload { component, reason }) => {
                self.stats.malformed_dropped += 1;
                warn!(%topic, %component, %reason, "dropping event with malformed payload");
            }
            Err(e) => {
                warn!(%topic, error = %e, "inbound event rejected");
            }
        }

        result
    }

    /// Re-attempts a held component. Called by the retry scheduler after each backoff.
    pub fn retry_pending(&mut self, component: &ComponentId) -> RetryOutcome {
        let Some(pending) = self.pending.get(component) else {
            return RetryOutcome::Gone;
        };

        if self.directory.contains_entity(&pending.record.entity_id) {
            let Some(pending) = self.pending.remove_component(component) else {
                return RetryOutcome::Gone;
            };
            return match self.apply_resolved(pending) {
                PendingState::Applied => {
                    self.stats.components_resolved += 1;
                    RetryOutcome::Applied
                }
                _ => {
                    self.stats.components_dropped += 1;
                    RetryOutcome::Dropped
                }
            };
        }

        match self.pending.record_attempt(component) {
            Some(PendingState::Dropped) => {
                self.stats.components_dropped += 1;
                warn!(
                    %component,
                    attempts = self.pending.max_attempts(),
                    "parent entity never arrived, dropping held component"
                );
                RetryOutcome::Dropped
            }
            Some(_) => RetryOutcome::StillPending {
                attempts: self.pending.get(component).map(|p| p.attempts).unwrap_or_default(),
            },
            None => RetryOutcome::Gone,
        }
    }

    /// Drops held components older than the pending ttl. Returns how many were dropped.
    pub fn expire_pending(&mut self, now: Instant) -> usize {
        let expired = self.pending.expire(now);
        for pending in &expired {
            warn!(
                component = %pending.record.id,
                entity = %pending.record.entity_id,
                "held component expired before its parent entity arrived"
            );
        }
        self.stats.components_dropped += expired.len() as u64;
        expired.len()
    }

    fn record_outcome(&mut self, outcome: &ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied { resolved } => {
                self.stats.events_applied += 1;
                self.stats.components_resolved += resolved.len() as u64;
            }
            ApplyOutcome::Removed { .. } | ApplyOutcome::PendingUpdated { .. } => {
                self.stats.events_applied += 1;
            }
            ApplyOutcome::Deferred { .. } => self.stats.components_deferred += 1,
            ApplyOutcome::Duplicate => self.stats.duplicates_ignored += 1,
            ApplyOutcome::SelfEcho | ApplyOutcome::Ignored(IgnoreReason::OwnedComponent) => {
                self.stats.echoes_suppressed += 1;
            }
            ApplyOutcome::Ignored(_) => {}
        }
    }

    fn is_local(&self, origin: Option<ParticipantId>) -> bool {
        origin == Some(self.local)
    }

    // ------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------

    fn apply_entity_created(&mut self, record: EntityRecord, origin: Option<ParticipantId>) -> ApplyOutcome {
        if self.is_local(origin) {
            return ApplyOutcome::SelfEcho;
        }
        if self.directory.contains_entity(&record.id) {
            return ApplyOutcome::Duplicate;
        }

        let handle = self.scene.spawn();
        self.directory
            .upsert_entity(Entity::new(record.id, handle, record.name, record.owner));

        let resolved = self.resolve_pending(record.id);
        ApplyOutcome::Applied { resolved }
    }

    fn apply_entity_patched(&mut self, record: EntityRecord, origin: Option<ParticipantId>) -> ApplyOutcome {
        if self.is_local(origin) {
            return ApplyOutcome::SelfEcho;
        }
        let Some(handle) = self.directory.lookup_entity(&record.id).map(|e| e.handle) else {
            return ApplyOutcome::Ignored(IgnoreReason::UnknownEntity);
        };

        // Owner is fixed at creation; only the name is refreshed
        self.directory
            .upsert_entity(Entity::new(record.id, handle, record.name, record.owner));
        ApplyOutcome::applied()
    }

    fn apply_entity_removed(&mut self, id: EntityId) -> ApplyOutcome {
        let discarded = self.pending.discard_entity(&id);
        self.stats.components_dropped += discarded.len() as u64;

        match self.directory.remove_entity(&id) {
            Some((entity, components)) => {
                self.scene.despawn(entity.handle);
                ApplyOutcome::Removed {
                    cascaded: components.len(),
                }
            }
            None => ApplyOutcome::Ignored(IgnoreReason::UnknownEntity),
        }
    }

    /// Applies every held component waiting on `entity`, returning the ones applied.
    fn resolve_pending(&mut self, entity: EntityId) -> Vec<ComponentId> {
        let mut resolved = Vec::new();
        for pending in self.pending.drain(&entity) {
            let id = pending.record.id;
            match self.apply_resolved(pending) {
                PendingState::Applied => resolved.push(id),
                _ => self.stats.components_dropped += 1,
            }
        }
        resolved
    }

    /// Applies a held component whose parent is now known. Returns its final state,
    /// `Applied` or `Dropped`.
    fn apply_resolved(&mut self, pending: PendingComponent) -> PendingState {
        let PendingComponent { record, origin, .. } = pending;
        let id = record.id;
        let payload = match decode_payload(id, &record.data) {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.malformed_dropped += 1;
                warn!(component = %id, error = %e, "dropping held component with malformed payload");
                return PendingState::Dropped;
            }
        };

        match self.insert_component(record, payload, origin) {
            ApplyOutcome::Applied { .. } => PendingState::Applied,
            _ => PendingState::Dropped,
        }
    }

    // ------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------

    fn apply_component_created(
        &mut self,
        record: ComponentRecord,
        origin: Option<ParticipantId>,
    ) -> Result<ApplyOutcome, SyncError> {
        if self.is_local(origin) {
            return Ok(ApplyOutcome::SelfEcho);
        }
        if self.directory.contains_component(&record.id) || self.pending.contains(&record.id) {
            return Ok(ApplyOutcome::Duplicate);
        }

        let payload = decode_payload(record.id, &record.data)?;
        Ok(self.insert_component(record, payload, origin))
    }

    /// Shared create path for live events, resolved pending entries and bulk load.
    fn insert_component(
        &mut self,
        record: ComponentRecord,
        payload: ComponentPayload,
        origin: Option<ParticipantId>,
    ) -> ApplyOutcome {
        let parent = self
            .directory
            .lookup_entity(&record.entity_id)
            .map(|entity| (entity.handle, entity.owner));
        let ownership = classify(parent.and_then(|(_, owner)| owner), self.local);
        let component = Component::new(record.id, record.entity_id, payload, ownership);

        match self.directory.upsert_component(component) {
            UpsertOutcome::Deferred => {
                let outcome = ApplyOutcome::Deferred {
                    component: record.id,
                    waiting_on: record.entity_id,
                };
                debug!(component = %record.id, entity = %record.entity_id, "parent entity unknown, holding component");
                self.pending.hold(record, origin);
                outcome
            }
            UpsertOutcome::KindTaken => {
                warn!(
                    component = %record.id,
                    entity = %record.entity_id,
                    kind = %payload.kind(),
                    "entity already has a component of this kind, ignoring"
                );
                ApplyOutcome::Ignored(IgnoreReason::KindTaken)
            }
            UpsertOutcome::Inserted | UpsertOutcome::Updated => {
                if let Some((handle, _)) = parent {
                    self.scene.merge(handle, &payload);
                }
                ApplyOutcome::applied()
            }
        }
    }

    fn apply_component_patched(
        &mut self,
        record: ComponentRecord,
        origin: Option<ParticipantId>,
    ) -> Result<ApplyOutcome, SyncError> {
        if self.is_local(origin) {
            return Ok(ApplyOutcome::SelfEcho);
        }

        let payload = decode_payload(record.id, &record.data)?;

        if self.pending.update_payload(&record.id, record.data) {
            return Ok(ApplyOutcome::PendingUpdated { component: record.id });
        }

        let Some(existing) = self.directory.lookup_component_mut(&record.id) else {
            return Ok(ApplyOutcome::Ignored(IgnoreReason::UnknownComponent));
        };
        if existing.ownership == Ownership::Owned {
            return Ok(ApplyOutcome::Ignored(IgnoreReason::OwnedComponent));
        }
        if existing.kind != payload.kind() {
            return Err(SyncError::KindMismatch {
                component: record.id,
                expected: existing.kind,
                received: payload.kind(),
            });
        }

        existing.payload = payload;
        let entity_id = existing.entity_id;

        if let Some(handle) = self.directory.lookup_entity(&entity_id).map(|e| e.handle) {
            self.scene.merge(handle, &payload);
        }
        Ok(ApplyOutcome::applied())
    }

    fn apply_component_removed(&mut self, id: ComponentId) -> ApplyOutcome {
        if self.pending.remove_component(&id).is_some() {
            return ApplyOutcome::Removed { cascaded: 0 };
        }

        match self.directory.remove_component(&id) {
            Some(component) => {
                if let Some(handle) = self.directory.lookup_entity(&component.entity_id).map(|e| e.handle) {
                    self.scene.remove_component(handle, component.kind);
                }
                ApplyOutcome::Removed { cascaded: 0 }
            }
            None => ApplyOutcome::Ignored(IgnoreReason::UnknownComponent),
        }
    }

    // ------------------------------------------------------------------
    // Participants
    // ------------------------------------------------------------------

    fn apply_participant_upsert(&mut self, record: ParticipantRecord, origin: Option<ParticipantId>) -> ApplyOutcome {
        if self.is_local(origin) || record.id == self.local {
            return ApplyOutcome::SelfEcho;
        }

        self.directory.upsert_participant(Participant {
            id: record.id,
            name: record.name,
            position: record.position,
        });
        ApplyOutcome::applied()
    }

    fn apply_participant_removed(&mut self, id: ParticipantId) -> ApplyOutcome {
        match self.directory.remove_participant(&id) {
            Some(_) => ApplyOutcome::Removed { cascaded: 0 },
            None => ApplyOutcome::Ignored(IgnoreReason::UnknownParticipant),
        }
    }
}
