//! # CRD controllers
//!
//! One reconcile loop per kind, each built on the same
//! `Controller::new(...).shutdown_on_signal().run(reconcile, error_policy,
//! ctx)` skeleton the rest of this codebase's controller bootstrap uses.
//! All four share one [`ControllerContext`]: the compiled rule store, the
//! watch manager, the event router, and the bookkeeping needed to tear a
//! worker or stream down once nothing references it any more.

pub mod cluster_watch_rule;
pub mod git_destination;
pub mod git_repo_config;
pub mod watch_rule;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use kube_runtime::controller::Action;
use tokio::sync::Mutex;
use tracing::error;

use crate::backoff::FibonacciBackoff;
use crate::config::Config;
use crate::correlation::CorrelationStore;
use crate::errors::ReconcilerError;
use crate::model::{BranchKey, DestinationRef, StreamKey};
use crate::router::EventRouter;
use crate::rules::RuleStore;
use crate::watch::WatchManager;
use crate::worker::git_ops::GitCredentials;

/// Shared dependencies every controller's reconcile function closes over.
pub struct ControllerContext {
    pub client: Client,
    pub config: Arc<Config>,
    pub rule_store: Arc<RuleStore>,
    pub watch_manager: Arc<WatchManager>,
    pub router: Arc<EventRouter>,
    pub correlation_store: Arc<CorrelationStore>,
    /// How many registered `GitDestination`s currently reference each
    /// branch worker, so the last one to unregister can tear the worker's
    /// router entry down. Workers created ad hoc by `GitDestination`
    /// reconciles, never directly by `GitRepoConfig`.
    worker_refcounts: Mutex<HashMap<BranchKey, usize>>,
    /// Which `GitDestination` currently owns a given stream key, so a
    /// second destination cannot silently steal another's base folder.
    stream_owners: Mutex<HashMap<StreamKey, DestinationRef>>,
    /// Per-resource Fibonacci backoff state, keyed by `kind/namespace/name`.
    /// `kube_runtime`'s error-policy closure is synchronous, so this uses a
    /// std mutex rather than the tokio one the other tables use.
    backoff_states: std::sync::Mutex<HashMap<String, BackoffState>>,
}

/// One resource's consecutive-failure backoff sequence. A resource that
/// succeeds has its count and sequence reset so the next unrelated failure
/// starts back at `DEFAULT_BACKOFF_MIN_SECS` instead of inheriting however
/// far a previous, unrelated failure streak had grown.
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(crate::constants::DEFAULT_BACKOFF_MIN_SECS, crate::constants::DEFAULT_BACKOFF_MAX_SECS),
            error_count: 0,
        }
    }
}

/// Builds the key `backoff_states` and the resource-key log field are
/// indexed by: `kind/namespace/name`, with `-` standing in for a
/// cluster-scoped resource's missing namespace.
#[must_use]
pub fn resource_key(kind: &str, namespace: Option<&str>, name: &str) -> String {
    format!("{kind}/{}/{name}", namespace.unwrap_or("-"))
}

impl ControllerContext {
    #[must_use]
    pub fn new(
        client: Client,
        config: Arc<Config>,
        rule_store: Arc<RuleStore>,
        watch_manager: Arc<WatchManager>,
        router: Arc<EventRouter>,
        correlation_store: Arc<CorrelationStore>,
    ) -> Self {
        Self {
            client,
            config,
            rule_store,
            watch_manager,
            router,
            correlation_store,
            worker_refcounts: Mutex::new(HashMap::new()),
            stream_owners: Mutex::new(HashMap::new()),
            backoff_states: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Advances `resource_key`'s Fibonacci sequence one step and returns the
    /// delay to requeue after. Called once per failed reconcile.
    fn next_error_backoff(&self, resource_key: &str) -> Duration {
        let mut states = self.backoff_states.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let state = states.entry(resource_key.to_string()).or_insert_with(BackoffState::new);
        state.error_count += 1;
        state.backoff.next_backoff()
    }

    /// Resets `resource_key`'s backoff sequence after a successful
    /// reconcile, so its next failure starts fresh rather than continuing
    /// wherever a past, now-resolved failure streak left off.
    pub fn reset_backoff(&self, resource_key: &str) {
        let mut states = self.backoff_states.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(state) = states.get_mut(resource_key) {
            state.error_count = 0;
            state.backoff.reset();
        }
    }

    /// Registers `destination` as owning `branch`, returning the new
    /// reference count. Called whenever a `GitDestination` reconcile
    /// confirms the worker it needs is running.
    async fn acquire_worker(&self, branch: &BranchKey) -> usize {
        let mut counts = self.worker_refcounts.lock().await;
        let count = counts.entry(branch.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// Releases `destination`'s reference to `branch`'s worker, returning
    /// the remaining reference count (0 means the worker is now unowned and
    /// safe to unregister from the router).
    async fn release_worker(&self, branch: &BranchKey) -> usize {
        let mut counts = self.worker_refcounts.lock().await;
        match counts.get_mut(branch) {
            Some(count) if *count > 1 => {
                *count -= 1;
                *count
            }
            Some(_) => {
                counts.remove(branch);
                0
            }
            None => 0,
        }
    }

    /// Number of distinct branch workers currently referenced by at least
    /// one `GitDestination`, for the `configbutler_active_workers` gauge.
    pub async fn active_worker_count(&self) -> usize {
        self.worker_refcounts.lock().await.len()
    }

    /// Claims `stream_key` for `destination`, failing if another
    /// destination already owns it. A destination re-claiming its own
    /// stream key (a re-reconcile) is always allowed.
    async fn claim_stream(&self, stream_key: &StreamKey, destination: &DestinationRef) -> Result<(), ReconcilerError> {
        let mut owners = self.stream_owners.lock().await;
        match owners.get(stream_key) {
            Some(owner) if owner != destination => Err(ReconcilerError::Conflict(format!(
                "base folder already claimed by destination {}/{}",
                owner.namespace, owner.name
            ))),
            _ => {
                owners.insert(stream_key.clone(), destination.clone());
                Ok(())
            }
        }
    }

    async fn release_stream(&self, stream_key: &StreamKey) {
        self.stream_owners.lock().await.remove(stream_key);
    }
}

/// Resolves Git credentials from the `Secret` a `GitRepoConfig` references.
/// HTTPS remotes read the `token` key; SSH remotes read `privateKey` (and an
/// optional `passphrase`), writing the key material to a per-repo scratch
/// file under `clone_cache_root` since `git2` takes SSH keys by path.
pub async fn resolve_git_credentials(
    client: &Client,
    secret_namespace: &str,
    secret_name: &str,
    repo_url: &str,
    clone_cache_root: &std::path::Path,
) -> Result<GitCredentials, ReconcilerError> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), secret_namespace);
    let secret = secrets
        .get(secret_name)
        .await
        .map_err(|e| ReconcilerError::Configuration(format!("secretRef '{secret_name}' not found: {e}")))?;
    let data = secret.data.unwrap_or_default();

    let is_ssh = !(repo_url.starts_with("http://") || repo_url.starts_with("https://"));
    if is_ssh {
        let key_bytes = data
            .get("privateKey")
            .ok_or_else(|| ReconcilerError::Configuration(format!("secret '{secret_name}' missing key 'privateKey'")))?;
        let key_dir = clone_cache_root.join("ssh-keys");
        tokio::fs::create_dir_all(&key_dir)
            .await
            .map_err(|e| ReconcilerError::Configuration(format!("failed to create ssh key scratch dir: {e}")))?;
        let key_path = key_dir.join(format!("{secret_namespace}-{secret_name}"));
        tokio::fs::write(&key_path, &key_bytes.0)
            .await
            .map_err(|e| ReconcilerError::Configuration(format!("failed to write ssh key scratch file: {e}")))?;
        let passphrase = data
            .get("passphrase")
            .map(|b| String::from_utf8_lossy(&b.0).into_owned());
        Ok(GitCredentials::Ssh {
            username: "git".to_string(),
            private_key: key_path,
            passphrase,
        })
    } else {
        let token = data
            .get("token")
            .ok_or_else(|| ReconcilerError::Configuration(format!("secret '{secret_name}' missing key 'token'")))?;
        Ok(GitCredentials::HttpsToken {
            token: String::from_utf8_lossy(&token.0).into_owned(),
        })
    }
}

/// The shared error-policy closure every controller's `Controller::run`
/// passes as its second argument: log, bump the error-counter metric, and
/// requeue using `resource_key`'s own Fibonacci backoff sequence, so one
/// resource stuck in a failure loop backs off on its own schedule instead of
/// sharing (and resetting) a sequence with every other object of its kind.
pub fn error_policy(kind: &'static str, resource_key: &str, error: &ReconcilerError, ctx: &ControllerContext) -> Action {
    error!(kind, resource_key, reason = error.reason(), error = %error, "reconcile failed");
    crate::observability::metrics::increment_reconciliation_errors(kind);
    crate::observability::metrics::increment_requeues(error.reason());
    Action::requeue(ctx.next_error_backoff(resource_key))
}

/// The default periodic requeue interval for a reconcile that completed
/// without error, shared by every controller. `interval` comes from
/// [`Config::reconcile_requeue`], so operators can tune reconcile frequency
/// without a restart-requiring constant change.
#[must_use]
pub fn default_requeue(interval: Duration) -> Action {
    crate::observability::metrics::increment_requeues("periodic");
    Action::requeue(interval)
}
