//! # Event router
//!
//! The sole entry point destinations use to reach the Git path. Routes four
//! kinds of traffic: live/reconciliation events to destination streams,
//! state requests to the watch manager or branch worker, state responses
//! back to the requesting folder reconciler, and informer topology-change
//! control events to affected folder reconcilers.
//!
//! Holds two maps, `BranchKey → worker` and `StreamKey → stream`, guarded by
//! a read-write lock: writes happen only on controller-driven
//! register/unregister, reads happen on every event.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::model::{BranchKey, DestinationRef, InformerStateChanged, MirrorEvent, StreamKey};
use crate::stream::DestinationStream;
use crate::worker::WorkerHandle;

/// Sends an [`InformerStateChanged`] signal to the folder reconciler that
/// registered interest in a destination.
pub type ReconcilerHandle = mpsc::Sender<InformerStateChanged>;

#[derive(Default)]
struct Tables {
    workers: HashMap<BranchKey, Arc<WorkerHandle>>,
    streams: HashMap<StreamKey, Arc<DestinationStream>>,
    reconcilers: HashMap<DestinationRef, ReconcilerHandle>,
}

/// Routing tables plus the bookkeeping needed to tear a destination's
/// stream/worker/reconciler registration down again on unregistration.
pub struct EventRouter {
    tables: RwLock<Tables>,
}

impl EventRouter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    pub async fn register_worker(&self, key: BranchKey, worker: Arc<WorkerHandle>) {
        self.tables.write().await.workers.insert(key, worker);
    }

    pub async fn unregister_worker(&self, key: &BranchKey) -> Option<Arc<WorkerHandle>> {
        self.tables.write().await.workers.remove(key)
    }

    pub async fn worker_for(&self, key: &BranchKey) -> Option<Arc<WorkerHandle>> {
        self.tables.read().await.workers.get(key).cloned()
    }

    pub async fn register_stream(&self, key: StreamKey, stream: Arc<DestinationStream>) {
        self.tables.write().await.streams.insert(key, stream);
    }

    pub async fn stream_for(&self, key: &StreamKey) -> Option<Arc<DestinationStream>> {
        self.tables.read().await.streams.get(key).cloned()
    }

    pub async fn unregister_stream(&self, key: &StreamKey) -> Option<Arc<DestinationStream>> {
        self.tables.write().await.streams.remove(key)
    }

    pub async fn register_reconciler(&self, destination: DestinationRef, handle: ReconcilerHandle) {
        self.tables.write().await.reconcilers.insert(destination, handle);
    }

    pub async fn unregister_reconciler(&self, destination: &DestinationRef) {
        self.tables.write().await.reconcilers.remove(destination);
    }

    /// Routes a live or reconciliation event to the stream owning its
    /// `(repo,branch,baseFolder)`. A missing stream (normal during
    /// controller convergence, before registration completes or after
    /// unregistration) logs at low level and drops the event.
    pub async fn route_event(&self, event: MirrorEvent) {
        let stream = self.tables.read().await.streams.get(&event.stream_key).cloned();
        match stream {
            Some(stream) => stream.push(event).await,
            None => debug!(
                stream_key = ?event.stream_key,
                "no destination stream registered, dropping event"
            ),
        }
    }

    /// Publishes an `InformerStateChanged` control event to the folder
    /// reconciler owning `destination`, if one is currently registered.
    pub async fn notify_informer_state_changed(&self, destination: DestinationRef) {
        let handle = self.tables.read().await.reconcilers.get(&destination).cloned();
        match handle {
            Some(handle) => {
                if handle
                    .send(InformerStateChanged {
                        destination: destination.clone(),
                    })
                    .await
                    .is_err()
                {
                    warn!(?destination, "folder reconciler channel closed");
                }
            }
            None => debug!(?destination, "no folder reconciler registered for control event"),
        }
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActorIdentity, Operation, ResourceIdentifier};
    use chrono::Utc;

    fn sample_event(stream_key: StreamKey) -> MirrorEvent {
        MirrorEvent {
            destination: DestinationRef::new("ns", "dest-a"),
            stream_key,
            identifier: ResourceIdentifier::new("", "v1", "configmaps", Some("ns".into()), "cm"),
            operation: Operation::Create,
            actor: ActorIdentity::new("alice", Utc::now()),
            sanitized_yaml: Some(b"data: {}\n".to_vec()),
            content_fingerprint: Some(1),
        }
    }

    #[tokio::test]
    async fn routing_to_an_unregistered_stream_drops_silently() {
        let router = EventRouter::new();
        let key = StreamKey::new("ns", "repo", "main", "clusters/dev");
        // No panic, no error returned; this is the documented behavior.
        router.route_event(sample_event(key)).await;
    }

    #[tokio::test]
    async fn notify_with_no_registered_reconciler_is_a_no_op() {
        let router = EventRouter::new();
        router
            .notify_informer_state_changed(DestinationRef::new("ns", "dest-a"))
            .await;
    }

    #[tokio::test]
    async fn notify_delivers_to_the_registered_reconciler() {
        let router = EventRouter::new();
        let (tx, mut rx) = mpsc::channel(1);
        let destination = DestinationRef::new("ns", "dest-a");
        router.register_reconciler(destination.clone(), tx).await;
        router.notify_informer_state_changed(destination.clone()).await;
        let signal = rx.recv().await.unwrap();
        assert_eq!(signal.destination, destination);
    }
}
