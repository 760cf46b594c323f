//! Append-only event log with a total order across streams.
//!
//! The [`EventStore`] trait is the local abstraction grains and the replay
//! runner persist through; backends plug in behind it. [`MemEventStore`] is
//! the in-process reference backend.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::EventStoreError;
use crate::event::{EventData, StoredEvent};

/// Durable, globally ordered, append-only log of events.
///
/// # Contract
///
/// - Stream versions start at 0 and are gapless within a stream; streams
///   are never rewritten.
/// - Global positions start at 0, are strictly increasing across the whole
///   log, and are never reassigned.
/// - [`head`](EventStore::head) yields the current log length and is
///   notified after every append, so subscriptions can tail without polling.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Append `events` to the end of `stream_id`, assigning stream versions
    /// and global positions.
    ///
    /// Returns the stream's new event count.
    async fn append(
        &self,
        stream_id: &str,
        events: Vec<EventData>,
    ) -> Result<u64, EventStoreError>;

    /// Read events of one stream with `stream_version >= from_version`,
    /// in stream order.
    async fn read_stream(
        &self,
        stream_id: &str,
        from_version: u64,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Read events across all streams with `global_position >= from_position`,
    /// in global order.
    async fn read_all_from(&self, from_position: u64)
    -> Result<Vec<StoredEvent>, EventStoreError>;

    /// A watch over the log length, notified after every append.
    fn head(&self) -> watch::Receiver<u64>;
}

/// In-memory [`EventStore`] backend.
///
/// Holds the global log as a single `Vec` plus a per-stream version counter.
/// Appends are serialized by an internal mutex; the guard is never held
/// across an await point.
pub struct MemEventStore {
    inner: Mutex<MemLog>,
    head_tx: watch::Sender<u64>,
}

struct MemLog {
    log: Vec<StoredEvent>,
    stream_heads: HashMap<String, u64>,
}

impl MemEventStore {
    /// Create an empty in-memory event store.
    pub fn new() -> Self {
        let (head_tx, _) = watch::channel(0u64);
        Self {
            inner: Mutex::new(MemLog {
                log: Vec::new(),
                stream_heads: HashMap::new(),
            }),
            head_tx,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemLog> {
        // A poisoned mutex means an append panicked mid-push; the log is
        // still structurally valid, so recover the guard.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for MemEventStore {
    async fn append(
        &self,
        stream_id: &str,
        events: Vec<EventData>,
    ) -> Result<u64, EventStoreError> {
        let new_head;
        let stream_count;
        {
            let mut inner = self.lock();
            let next_version = inner.stream_heads.get(stream_id).copied().unwrap_or(0);
            let mut version = next_version;
            for event in events {
                let global_position = inner.log.len() as u64;
                inner.log.push(StoredEvent {
                    stream_id: stream_id.to_owned(),
                    stream_version: version,
                    global_position,
                    event_type: event.event_type,
                    payload: event.payload,
                });
                version += 1;
            }
            inner.stream_heads.insert(stream_id.to_owned(), version);
            new_head = inner.log.len() as u64;
            stream_count = version;
        }

        // Notify tailing subscriptions after the lock is released.
        let _ = self.head_tx.send(new_head);

        tracing::debug!(stream_id, stream_count, "events appended");
        Ok(stream_count)
    }

    async fn read_stream(
        &self,
        stream_id: &str,
        from_version: u64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let inner = self.lock();
        Ok(inner
            .log
            .iter()
            .filter(|e| e.stream_id == stream_id && e.stream_version >= from_version)
            .cloned()
            .collect())
    }

    async fn read_all_from(
        &self,
        from_position: u64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let inner = self.lock();
        let start = (from_position as usize).min(inner.log.len());
        Ok(inner.log[start..].to_vec())
    }

    fn head(&self) -> watch::Receiver<u64> {
        self.head_tx.subscribe()
    }
}
