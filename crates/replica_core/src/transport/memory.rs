use super::Transport;
use crate::error::TransportError;
use crate::records::{Action, Change, Envelope, Record, RecordKind, Topic};
use crate::types::ParticipantId;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{trace, warn};
use uuid::Uuid;

const TOPIC_CAPACITY: usize = 1024;

/// In-process shared store with per-topic broadcast subscriptions.
///
/// Records are keyed by `(kind, id)`. Every successful mutation is published on the
/// matching topic, tagged with the participant that issued it.
#[derive(Debug)]
pub struct MemoryStore {
    records: DashMap<(RecordKind, Uuid), Record>,
    topics: HashMap<Topic, broadcast::Sender<Envelope>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        let topics = Topic::all()
            .into_iter()
            .map(|topic| (topic, broadcast::channel(TOPIC_CAPACITY).0))
            .collect();

        Self {
            records: DashMap::new(),
            topics,
            offline: AtomicBool::new(false),
        }
    }

    /// While offline every request fails with [`TransportError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    pub fn record_count(&self, kind: RecordKind) -> usize {
        self.records.iter().filter(|entry| entry.key().0 == kind).count()
    }

    pub fn get(&self, kind: RecordKind, id: Uuid) -> Option<Record> {
        self.records.get(&(kind, id)).map(|entry| entry.value().clone())
    }

    fn ensure_online(&self) -> Result<(), TransportError> {
        if self.offline.load(Ordering::Acquire) {
            return Err(TransportError::Unavailable("store is offline".to_string()));
        }
        Ok(())
    }

    fn publish(&self, action: Action, record: Record, origin: ParticipantId) {
        let change = Change::from_record(action, record);
        let topic = change.topic();
        if let Some(sender) = self.topics.get(&topic) {
            // No receivers is not an error
            let receivers = sender.send(Envelope::new(Some(origin), change)).unwrap_or(0);
            trace!(%topic, %origin, receivers, "published change");
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryStore {
    async fn create(&self, record: Record, origin: ParticipantId) -> Result<(), TransportError> {
        self.ensure_online()?;
        let key = (record.kind(), record.id());

        match self.records.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(TransportError::Rejected(format!("{} {} already exists", key.0, key.1)));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record.clone());
            }
        }

        self.publish(Action::Created, record, origin);
        Ok(())
    }

    async fn find(&self, kind: RecordKind) -> Result<Vec<Record>, TransportError> {
        self.ensure_online()?;
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.key().0 == kind)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn patch(&self, record: Record, origin: ParticipantId) -> Result<(), TransportError> {
        self.ensure_online()?;
        let key = (record.kind(), record.id());

        match self.records.get_mut(&key) {
            Some(mut stored) => *stored = record.clone(),
            None => return Err(TransportError::NotFound(format!("{} {}", key.0, key.1))),
        }

        self.publish(Action::Patched, record, origin);
        Ok(())
    }

    async fn remove(&self, kind: RecordKind, id: Uuid, origin: ParticipantId) -> Result<(), TransportError> {
        self.ensure_online()?;

        let Some((_, record)) = self.records.remove(&(kind, id)) else {
            return Err(TransportError::NotFound(format!("{kind} {id}")));
        };

        self.publish(Action::Removed, record, origin);
        Ok(())
    }

    async fn subscribe(&self, topic: Topic) -> Result<BoxStream<'static, Envelope>, TransportError> {
        self.ensure_online()?;
        let sender = self
            .topics
            .get(&topic)
            .ok_or_else(|| TransportError::Rejected(format!("unknown topic {topic}")))?;

        let receiver = sender.subscribe();
        let stream = stream::unfold(receiver, move |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(envelope) => return Some((envelope, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%topic, skipped, "subscriber lagged, change notifications lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream.boxed())
    }
}
