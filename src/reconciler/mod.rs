//! # Folder reconciler
//!
//! One task per registered [`GitDestination`], reconciling its base folder
//! against the live cluster objects its rules currently select. Runs on
//! registration, on an `InformerStateChanged` control signal (a GVR came or
//! went), and on a periodic tick — never in response to individual mirror
//! events, which already flow straight through the destination stream.
//!
//! [`GitDestination`]: crate::crd::GitDestination

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::constants::{DEFAULT_CONTROLLER_REQUEUE_SECS, DEFAULT_STATE_REQUEST_TIMEOUT_SECS};
use crate::model::{ActorIdentity, DestinationRef, InformerStateChanged, MirrorEvent, Operation, ResourceIdentifier, StreamKey};
use crate::router::EventRouter;
use crate::sanitize;
use crate::watch::WatchManager;

/// Which of `destination`'s base folder this reconciler keeps converged,
/// and the branch worker that owns that folder's clone.
#[derive(Debug, Clone)]
pub struct FolderReconcilerConfig {
    pub destination: DestinationRef,
    pub stream_key: StreamKey,
}

/// The state a reconcile pass is currently in, surfaced only for logging —
/// a pass either runs to completion or aborts back to idle on timeout, it
/// never resumes mid-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    AwaitingCluster,
    AwaitingRepo,
    Reconciling,
}

pub struct FolderReconciler {
    config: FolderReconcilerConfig,
    watch_manager: Arc<WatchManager>,
    router: Arc<EventRouter>,
}

impl FolderReconciler {
    /// Registers this destination's control-event channel with the router
    /// and spawns the reconcile loop. The returned handle is the caller's
    /// (a `GitDestination` controller's) to `abort` and to unregister from
    /// the router on teardown.
    pub async fn spawn(
        config: FolderReconcilerConfig,
        watch_manager: Arc<WatchManager>,
        router: Arc<EventRouter>,
    ) -> tokio::task::JoinHandle<()> {
        let (tx, rx) = mpsc::channel(8);
        router.register_reconciler(config.destination.clone(), tx).await;

        let reconciler = FolderReconciler {
            config,
            watch_manager,
            router,
        };
        tokio::spawn(reconciler.run(rx))
    }

    async fn run(self, mut control_rx: mpsc::Receiver<InformerStateChanged>) {
        let mut tick = tokio::time::interval(Duration::from_secs(DEFAULT_CONTROLLER_REQUEUE_SECS));
        tick.tick().await; // first tick fires immediately

        self.reconcile_once().await;
        loop {
            tokio::select! {
                signal = control_rx.recv() => {
                    match signal {
                        Some(_) => self.reconcile_once().await,
                        None => {
                            debug!(destination = ?self.config.destination, "control channel closed, folder reconciler stopping");
                            return;
                        }
                    }
                }
                _ = tick.tick() => {
                    self.reconcile_once().await;
                }
            }
        }
    }

    /// Runs one full `Idle → AwaitingCluster → AwaitingRepo → Reconciling →
    /// Idle` pass. Any state-request timeout or missing dependency (worker
    /// not yet registered) aborts the pass back to `Idle` without error —
    /// the next trigger tries again from scratch.
    async fn reconcile_once(&self) {
        let destination = &self.config.destination;
        let timeout = Duration::from_secs(DEFAULT_STATE_REQUEST_TIMEOUT_SECS);

        let state = State::AwaitingCluster;
        let live = match tokio::time::timeout(timeout, self.watch_manager.list_live_identifiers(destination)).await {
            Ok(Ok(identifiers)) => identifiers,
            Ok(Err(err)) => {
                warn!(?destination, %err, ?state, "failed to list live cluster state, aborting to idle");
                return;
            }
            Err(_) => {
                warn!(?destination, ?state, "timed out awaiting cluster state, aborting to idle");
                return;
            }
        };

        let Some(worker) = self.router.worker_for(&self.config.stream_key.branch_key()).await else {
            debug!(?destination, "no branch worker registered yet, skipping reconcile pass");
            return;
        };

        let state = State::AwaitingRepo;
        let base_folder = self.config.stream_key.base_folder.clone();
        let repo = match tokio::time::timeout(timeout, worker.list_resources_in_base_folder(base_folder)).await {
            Ok(Ok(identifiers)) => identifiers,
            Ok(Err(err)) => {
                warn!(?destination, %err, ?state, "failed to list base folder contents, aborting to idle");
                return;
            }
            Err(_) => {
                warn!(?destination, ?state, "timed out awaiting repo state, aborting to idle");
                return;
            }
        };

        let _state = State::Reconciling;
        let live_set: HashSet<ResourceIdentifier> = live.into_iter().collect();
        let repo_set: HashSet<ResourceIdentifier> = repo.into_iter().collect();

        let to_create: Vec<&ResourceIdentifier> = live_set.difference(&repo_set).collect();
        let to_delete: Vec<&ResourceIdentifier> = repo_set.difference(&live_set).collect();
        let to_reconcile: Vec<&ResourceIdentifier> = live_set.intersection(&repo_set).collect();

        if to_create.is_empty() && to_delete.is_empty() && to_reconcile.is_empty() {
            debug!(?destination, "reconcile pass found nothing to do");
            return;
        }
        info!(
            ?destination,
            to_create = to_create.len(),
            to_delete = to_delete.len(),
            to_reconcile = to_reconcile.len(),
            "reconcile pass diff computed"
        );

        for identifier in to_delete {
            self.emit(identifier.clone(), Operation::Delete, None, None).await;
        }
        for identifier in to_create.into_iter().chain(to_reconcile) {
            self.fetch_and_emit(identifier).await;
        }
    }

    async fn fetch_and_emit(&self, identifier: &ResourceIdentifier) {
        let object = match self.watch_manager.fetch_object(identifier).await {
            Ok(Some(object)) => object,
            Ok(None) => {
                debug!(%identifier, "object vanished between listing and fetch, skipping");
                return;
            }
            Err(err) => {
                warn!(%identifier, %err, "failed to fetch object for reconciliation");
                return;
            }
        };

        let value = match serde_json::to_value(&object) {
            Ok(v) => v,
            Err(err) => {
                warn!(%identifier, %err, "failed to serialize object for reconciliation");
                return;
            }
        };
        let Ok(canonical) = sanitize::canonical_bytes(&value) else {
            warn!(%identifier, "failed to sanitize object for reconciliation");
            return;
        };
        let fingerprint = crate::fingerprint::content_fingerprint(&canonical);
        self.emit(identifier.clone(), Operation::Update, Some(canonical), Some(fingerprint)).await;
    }

    async fn emit(
        &self,
        identifier: ResourceIdentifier,
        operation: Operation,
        sanitized_yaml: Option<Vec<u8>>,
        content_fingerprint: Option<u64>,
    ) {
        let event = MirrorEvent {
            destination: self.config.destination.clone(),
            stream_key: self.config.stream_key.clone(),
            identifier,
            operation,
            actor: ActorIdentity::system(Utc::now()),
            sanitized_yaml,
            content_fingerprint,
        };
        crate::observability::metrics::increment_events_ingested(operation.as_commit_tag(), "reconcile");
        self.router.route_event(event).await;
    }
}
