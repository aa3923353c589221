//! # Transport Seam
//!
//! The shared backing store is reached through the [`Transport`] trait: record requests
//! (create, find, patch, remove) and one change subscription per topic. Every mutating
//! request carries the id of the participant issuing it so the resulting change
//! notification can be tagged with its origin.
//!
//! [`MemoryStore`] is an in-process store used by the demo node and the tests.

mod memory;

pub use memory::MemoryStore;

use crate::error::TransportError;
use crate::records::{Envelope, Record, RecordKind, Topic};
use crate::types::ParticipantId;
use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug + 'static {
    /// Creates a record. Fails if a record with the same id already exists.
    async fn create(&self, record: Record, origin: ParticipantId) -> Result<(), TransportError>;

    /// Returns every record of `kind` currently in the store.
    async fn find(&self, kind: RecordKind) -> Result<Vec<Record>, TransportError>;

    /// Replaces an existing record.
    async fn patch(&self, record: Record, origin: ParticipantId) -> Result<(), TransportError>;

    /// Removes a record by id.
    async fn remove(&self, kind: RecordKind, id: Uuid, origin: ParticipantId) -> Result<(), TransportError>;

    /// Subscribes to change notifications of one topic.
    ///
    /// Only changes made after the subscription is established are delivered.
    async fn subscribe(&self, topic: Topic) -> Result<BoxStream<'static, Envelope>, TransportError>;
}
