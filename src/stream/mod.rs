//! # Destination stream
//!
//! Per-`(repo,branch,baseFolder)` ordered, deduplicated event buffer that
//! forwards into the single worker for `(repo,branch)`. Live events and
//! reconciliation events share one stream; there is no priority between
//! them, since the worker's batching absorbs ordering.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, warn};

use crate::model::{MirrorEvent, ResourceIdentifier, StreamKey};

/// Small per-identifier memory of the last fingerprint forwarded for that
/// identifier, bounded globally by `capacity` entries (oldest identifier
/// evicted first). Lives in the stream, not the worker, so each
/// destination has an isolated dedup window.
struct DedupWindow {
    last_forwarded: HashMap<ResourceIdentifier, u64>,
    order: VecDeque<ResourceIdentifier>,
    capacity: usize,
}

impl DedupWindow {
    fn new(capacity: usize) -> Self {
        Self {
            last_forwarded: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Returns `true` if the event should be forwarded. DELETE events carry
    /// no fingerprint and are never deduplicated; they also clear the
    /// memory for that identifier, since a later CREATE must be compared
    /// fresh.
    fn admit(&mut self, identifier: &ResourceIdentifier, fingerprint: Option<u64>) -> bool {
        let Some(fingerprint) = fingerprint else {
            self.last_forwarded.remove(identifier);
            return true;
        };
        if self.last_forwarded.get(identifier) == Some(&fingerprint) {
            return false;
        }
        self.record(identifier.clone(), fingerprint);
        true
    }

    fn record(&mut self, identifier: ResourceIdentifier, fingerprint: u64) {
        let is_new = !self.last_forwarded.contains_key(&identifier);
        self.last_forwarded.insert(identifier.clone(), fingerprint);
        if is_new {
            self.order.push_back(identifier);
            while self.order.len() > self.capacity {
                if let Some(victim) = self.order.pop_front() {
                    self.last_forwarded.remove(&victim);
                }
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StreamStats {
    pub forwarded: u64,
    pub deduplicated: u64,
    pub overflow_dropped: u64,
}

struct SharedState {
    buffer: VecDeque<MirrorEvent>,
    dedup: DedupWindow,
}

/// A running destination stream: push events in, they come out the other
/// end on `worker_tx` in arrival order, minus anything the dedup window
/// drops and minus the oldest entries dropped on overflow.
pub struct DestinationStream {
    stream_key: StreamKey,
    shared: Arc<Mutex<SharedState>>,
    notify: Arc<Notify>,
    capacity: usize,
    forwarded: Arc<AtomicU64>,
    deduplicated: Arc<AtomicU64>,
    overflow_dropped: Arc<AtomicU64>,
}

impl DestinationStream {
    /// Spawns the stream's forwarding task and returns a handle. `worker_tx`
    /// is the channel into the owning branch worker's processing loop.
    #[must_use]
    pub fn spawn(
        stream_key: StreamKey,
        capacity: usize,
        dedup_window: usize,
        worker_tx: mpsc::Sender<MirrorEvent>,
    ) -> Self {
        let shared = Arc::new(Mutex::new(SharedState {
            buffer: VecDeque::new(),
            dedup: DedupWindow::new(dedup_window),
        }));
        let notify = Arc::new(Notify::new());
        let forwarded = Arc::new(AtomicU64::new(0));
        let deduplicated = Arc::new(AtomicU64::new(0));
        let overflow_dropped = Arc::new(AtomicU64::new(0));

        let task_shared = Arc::clone(&shared);
        let task_notify = Arc::clone(&notify);
        let task_forwarded = Arc::clone(&forwarded);
        let task_key = stream_key.clone();
        tokio::spawn(async move {
            loop {
                let next = {
                    let mut state = task_shared.lock().await;
                    let popped = state.buffer.pop_front();
                    if popped.is_some() {
                        crate::observability::metrics::set_stream_queue_depth(&format_stream_key(&task_key), state.buffer.len() as i64);
                    }
                    popped
                };
                let Some(event) = next else {
                    task_notify.notified().await;
                    continue;
                };
                task_forwarded.fetch_add(1, Ordering::Relaxed);
                if worker_tx.send(event).await.is_err() {
                    warn!(stream = %format_stream_key(&task_key), "branch worker channel closed, stopping stream");
                    break;
                }
            }
        });

        Self {
            stream_key,
            shared,
            notify,
            capacity,
            forwarded,
            deduplicated,
            overflow_dropped,
        }
    }

    /// Enqueues `event`, applying the dedup window and the overflow policy.
    /// Never blocks: the stream owns its buffer outright.
    pub async fn push(&self, event: MirrorEvent) {
        let mut state = self.shared.lock().await;
        let admitted = state
            .dedup
            .admit(&event.identifier, event.content_fingerprint);
        if !admitted {
            self.deduplicated.fetch_add(1, Ordering::Relaxed);
            debug!(
                stream = %format_stream_key(&self.stream_key),
                identifier = %event.identifier,
                "dropping event: identical to last-forwarded content"
            );
            return;
        }
        if state.buffer.len() >= self.capacity {
            state.buffer.pop_front();
            self.overflow_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                stream = %format_stream_key(&self.stream_key),
                "stream buffer at capacity, dropped oldest event"
            );
        }
        state.buffer.push_back(event);
        let depth = state.buffer.len();
        drop(state);
        crate::observability::metrics::set_stream_queue_depth(&format_stream_key(&self.stream_key), depth as i64);
        self.notify.notify_one();
    }

    /// Current buffered event count, for the `GitDestination` controller's
    /// `workerStatus.queuedEvents` field.
    pub async fn queue_depth(&self) -> usize {
        self.shared.lock().await.buffer.len()
    }

    #[must_use]
    pub fn stats(&self) -> StreamStats {
        StreamStats {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            overflow_dropped: self.overflow_dropped.load(Ordering::Relaxed),
        }
    }
}

fn format_stream_key(key: &StreamKey) -> String {
    format!(
        "{}/{}/{}/{}",
        key.repo_namespace, key.repo_name, key.branch, key.base_folder
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActorIdentity, DestinationRef, Operation};
    use chrono::Utc;

    fn event(name: &str, op: Operation, fingerprint: Option<u64>) -> MirrorEvent {
        let identifier = ResourceIdentifier::new("", "v1", "configmaps", Some("app-a".into()), name);
        let stream_key = StreamKey::new("ns", "repo", "main", "clusters/dev");
        MirrorEvent {
            destination: DestinationRef::new("ns", "dest-a"),
            stream_key,
            identifier,
            operation: op,
            actor: ActorIdentity::new("alice", Utc::now()),
            sanitized_yaml: fingerprint.map(|_| b"data: {}\n".to_vec()),
            content_fingerprint: fingerprint,
        }
    }

    #[tokio::test]
    async fn forwards_events_in_arrival_order() {
        let (tx, mut rx) = mpsc::channel(16);
        let stream = DestinationStream::spawn(
            StreamKey::new("ns", "repo", "main", "clusters/dev"),
            10,
            10,
            tx,
        );
        stream.push(event("a", Operation::Create, Some(1))).await;
        stream.push(event("b", Operation::Create, Some(2))).await;
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.identifier.name, "a");
        assert_eq!(second.identifier.name, "b");
    }

    #[tokio::test]
    async fn duplicate_fingerprint_for_same_identifier_is_dropped() {
        let (tx, mut rx) = mpsc::channel(16);
        let stream = DestinationStream::spawn(
            StreamKey::new("ns", "repo", "main", "clusters/dev"),
            10,
            10,
            tx,
        );
        stream
            .push(event("settings", Operation::Update, Some(7)))
            .await;
        stream
            .push(event("settings", Operation::Update, Some(7)))
            .await;
        let _first = rx.recv().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(stream.stats().deduplicated, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn delete_events_are_never_deduplicated() {
        let (tx, mut rx) = mpsc::channel(16);
        let stream = DestinationStream::spawn(
            StreamKey::new("ns", "repo", "main", "clusters/dev"),
            10,
            10,
            tx,
        );
        stream.push(event("settings", Operation::Delete, None)).await;
        stream.push(event("settings", Operation::Delete, None)).await;
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert_eq!(stream.stats().deduplicated, 0);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_event_and_increments_counter() {
        let (tx, mut rx) = mpsc::channel(1);
        // Fill the consumer channel first so the stream's own buffer backs up.
        tx.send(event("blocker", Operation::Create, Some(0)))
            .await
            .unwrap();
        let stream = DestinationStream::spawn(
            StreamKey::new("ns", "repo", "main", "clusters/dev"),
            2,
            10,
            tx,
        );
        stream.push(event("a", Operation::Create, Some(1))).await;
        stream.push(event("b", Operation::Create, Some(2))).await;
        stream.push(event("c", Operation::Create, Some(3))).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(stream.stats().overflow_dropped, 1);

        let drained_blocker = rx.recv().await.unwrap();
        assert_eq!(drained_blocker.identifier.name, "blocker");
    }
}
