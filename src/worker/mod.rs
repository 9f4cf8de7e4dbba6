//! # Branch worker
//!
//! Owns exactly one `(repoNamespace, repoName, branch)` clone. Every
//! destination sharing that branch funnels its events, via its own
//! [`crate::stream::DestinationStream`], into this worker's single
//! processing loop — serializing all writes to the clone without a lock.
//!
//! Three things a worker exposes to the rest of the system:
//! `register_destination`/`unregister_destination` (bookkeeping only, no
//! Git I/O), `sync_and_get_metadata` (a cached, debounced pull-state
//! report), and `list_resources_in_base_folder` (a working-tree scan). The
//! processing loop and its commit pipeline are the worker's private
//! business.

pub mod encrypt;
pub mod git_ops;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::constants::{
    DEFAULT_FLUSH_MAX_AGE_SECS, DEFAULT_FLUSH_MAX_BYTES, DEFAULT_FLUSH_MAX_EVENTS,
    DEFAULT_PULL_REPORT_CACHE_SECS, DEFAULT_PUSH_RETRY_LIMIT,
};
use crate::model::{BranchKey, MirrorEvent};
use encrypt::EncryptionTool;
use git_ops::{BotIdentity, CommitTrailer, GitCredentials, PushOutcome, StagedChange};

/// Everything the worker needs to find and authenticate against its clone,
/// resolved once by the `GitRepoConfig` controller before the worker is
/// spawned.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub branch_key: BranchKey,
    pub repo_url: String,
    pub default_branch: String,
    pub clone_path: PathBuf,
    pub bot: BotIdentity,
    pub credentials: GitCredentials,
}

/// A point-in-time summary of this worker's clone, returned by
/// [`WorkerHandle::sync_and_get_metadata`]. Cached for
/// [`crate::constants::DEFAULT_PULL_REPORT_CACHE_SECS`] so a burst of
/// concurrent folder-reconciler requests collapses into one fetch.
#[derive(Debug, Clone)]
pub struct PullReport {
    pub branch_exists: bool,
    pub head_sha: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub last_push_time: Option<DateTime<Utc>>,
    pub last_push_status: Option<PushStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    Succeeded,
    Failed,
}

struct CachedReport {
    report: PullReport,
    cached_at: Instant,
}

/// One accumulating batch, flushed on whichever trigger fires first: event
/// count, accumulated byte size, or the oldest buffered event's age.
struct PendingBatch {
    events: Vec<MirrorEvent>,
    byte_total: usize,
    first_buffered_at: Option<Instant>,
}

impl PendingBatch {
    fn new() -> Self {
        Self {
            events: Vec::new(),
            byte_total: 0,
            first_buffered_at: None,
        }
    }

    fn push(&mut self, event: MirrorEvent) {
        self.byte_total += event.sanitized_yaml.as_ref().map_or(0, Vec::len);
        if self.first_buffered_at.is_none() {
            self.first_buffered_at = Some(Instant::now());
        }
        self.events.push(event);
    }

    fn should_flush(&self) -> bool {
        if self.events.is_empty() {
            return false;
        }
        self.events.len() >= DEFAULT_FLUSH_MAX_EVENTS || self.byte_total >= DEFAULT_FLUSH_MAX_BYTES
    }

    fn take(&mut self) -> Vec<MirrorEvent> {
        self.byte_total = 0;
        self.first_buffered_at = None;
        std::mem::take(&mut self.events)
    }
}

async fn age_deadline(first_buffered_at: Option<Instant>) {
    match first_buffered_at {
        Some(started) => {
            let deadline = started + Duration::from_secs(DEFAULT_FLUSH_MAX_AGE_SECS);
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
        }
        None => std::future::pending().await,
    }
}

/// A running branch worker: a clone directory, a bot identity, a private
/// clone-level lock serializing every Git operation, and a processing loop
/// task reachable through `event_tx`.
pub struct WorkerHandle {
    config: WorkerConfig,
    event_tx: mpsc::Sender<MirrorEvent>,
    destinations: Mutex<HashMap<crate::model::DestinationRef, String>>,
    report_cache: Mutex<Option<CachedReport>>,
    encryption_tool: Option<EncryptionTool>,
}

impl WorkerHandle {
    /// Spawns the worker's processing loop and returns a handle to it. The
    /// clone itself is created lazily on first flush, not here, so worker
    /// startup never blocks on network I/O.
    #[must_use]
    pub fn spawn(config: WorkerConfig, encryption_tool: Option<EncryptionTool>) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::channel(DEFAULT_FLUSH_MAX_EVENTS);
        let handle = Arc::new(Self {
            config,
            event_tx,
            destinations: Mutex::new(HashMap::new()),
            report_cache: Mutex::new(None),
            encryption_tool,
        });
        tokio::spawn(Arc::clone(&handle).run(event_rx));
        handle
    }

    #[must_use]
    pub fn branch_key(&self) -> &BranchKey {
        &self.config.branch_key
    }

    /// A clone of the channel into this worker's processing loop, handed to
    /// a newly spawned [`crate::stream::DestinationStream`] so it can
    /// forward events here. Cheap: an `mpsc::Sender` clone is just a
    /// reference bump.
    #[must_use]
    pub fn event_sender(&self) -> mpsc::Sender<MirrorEvent> {
        self.event_tx.clone()
    }

    /// Number of destinations currently sharing this worker's clone. The
    /// router's own refcount, not this, is what a `GitDestination`
    /// reconcile's teardown path checks before unregistering the worker.
    pub async fn destination_count(&self) -> usize {
        self.destinations.lock().await.len()
    }

    /// Bookkeeping only: remembers which base folder belongs to which
    /// destination so the worker can log meaningfully and, eventually,
    /// detect base-folder collisions at registration time.
    pub async fn register_destination(&self, destination: crate::model::DestinationRef, base_folder: String) {
        self.destinations.lock().await.insert(destination, base_folder);
    }

    pub async fn unregister_destination(&self, destination: &crate::model::DestinationRef) {
        self.destinations.lock().await.remove(destination);
    }

    /// Feeds an event into the processing loop. Backpressure here is
    /// intentional: the destination stream already buffers and drops on
    /// overflow, so the worker's own channel can simply block until there
    /// is room, giving its flush triggers a natural pace.
    pub async fn submit(&self, event: MirrorEvent) -> Result<(), mpsc::error::SendError<MirrorEvent>> {
        self.event_tx.send(event).await
    }

    /// Returns a cached pull-state report, refreshing it if the cache is
    /// stale. Concurrent callers within the cache window share one
    /// underlying fetch by virtue of waiting on the same mutex.
    pub async fn sync_and_get_metadata(&self) -> anyhow::Result<PullReport> {
        let mut cache = self.report_cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.cached_at.elapsed() < Duration::from_secs(DEFAULT_PULL_REPORT_CACHE_SECS) {
                return Ok(cached.report.clone());
            }
        }

        let config = self.config.clone();
        let mut report = tokio::task::spawn_blocking(move || fetch_pull_report(&config)).await??;
        // A fresh fetch only knows about the remote's current state, not the
        // worker's own push history, so carry that part of the previous
        // report forward rather than losing it on every cache refresh.
        if let Some(previous) = cache.as_ref() {
            report.last_push_time = previous.report.last_push_time;
            report.last_push_status = previous.report.last_push_status;
        }
        *cache = Some(CachedReport {
            report: report.clone(),
            cached_at: Instant::now(),
        });
        Ok(report)
    }

    /// Records the outcome of a push in the metadata cache, so the next
    /// `syncAndGetMetadata` call (and thus the `GitDestination` controller's
    /// `Synced` condition) reflects it immediately rather than waiting for
    /// the cache's own TTL to lapse.
    async fn record_push_outcome(&self, status: PushStatus, head_sha: Option<String>) {
        let mut cache = self.report_cache.lock().await;
        let now = Utc::now();
        match cache.as_mut() {
            Some(cached) => {
                cached.report.last_push_status = Some(status);
                cached.report.last_push_time = Some(now);
                if let Some(sha) = head_sha {
                    cached.report.head_sha = Some(sha);
                    cached.report.branch_exists = true;
                }
            }
            None => {
                *cache = Some(CachedReport {
                    report: PullReport {
                        branch_exists: head_sha.is_some(),
                        head_sha,
                        fetched_at: now,
                        last_push_time: Some(now),
                        last_push_status: Some(status),
                    },
                    cached_at: Instant::now(),
                });
            }
        }
    }

    /// Decodes every object identifier currently materialized under
    /// `base_folder` in the working tree.
    pub async fn list_resources_in_base_folder(
        &self,
        base_folder: String,
    ) -> anyhow::Result<Vec<crate::model::ResourceIdentifier>> {
        let repo_path = self.config.clone_path.clone();
        let identifiers =
            tokio::task::spawn_blocking(move || git_ops::list_identifiers_in_base_folder(&repo_path, &base_folder))
                .await?;
        Ok(identifiers)
    }

    async fn run(self: Arc<Self>, mut event_rx: mpsc::Receiver<MirrorEvent>) {
        let mut batch = PendingBatch::new();
        loop {
            tokio::select! {
                biased;
                maybe_event = event_rx.recv() => {
                    match maybe_event {
                        Some(event) => {
                            batch.push(event);
                            if batch.should_flush() {
                                self.flush(batch.take()).await;
                            }
                        }
                        None => {
                            if !batch.events.is_empty() {
                                self.flush(batch.take()).await;
                            }
                            break;
                        }
                    }
                }
                () = age_deadline(batch.first_buffered_at) => {
                    if !batch.events.is_empty() {
                        self.flush(batch.take()).await;
                    }
                }
            }
        }
    }

    /// Renders, stages, commits, and pushes one batch. A batch producing no
    /// net change against the current clone yields zero commits.
    async fn flush(&self, events: Vec<MirrorEvent>) {
        if events.is_empty() {
            return;
        }
        let batch_len = events.len();
        let mut rendered = Vec::with_capacity(events.len());
        for event in &events {
            match self.render_change(event).await {
                Ok(change) => rendered.push((change, event)),
                Err(err) => {
                    error!(
                        branch = ?self.config.branch_key,
                        identifier = %event.identifier,
                        error = %err,
                        "dropping event: failed to render change"
                    );
                }
            }
        }
        if rendered.is_empty() {
            return;
        }

        let changes: Vec<StagedChange> = rendered.iter().map(|(c, _)| clone_staged_change(c)).collect();
        let leading_line = commit_leading_line(&rendered);
        let trailers: Vec<CommitTrailer> = rendered
            .iter()
            .map(|(_, event)| CommitTrailer {
                actor: event.actor.username.clone(),
            })
            .collect();
        let commit_byte_total: u64 = changes
            .iter()
            .map(|c| match c {
                StagedChange::Write { contents, .. } => contents.len() as u64,
                StagedChange::Remove { .. } => 0,
            })
            .sum();

        crate::observability::metrics::observe_flush_batch_size(batch_len);

        let config = self.config.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            commit_and_push(&config, &changes, &leading_line, &trailers)
        })
        .await;

        match outcome {
            Ok(Ok(Some(commit_sha))) => {
                info!(
                    branch = ?self.config.branch_key,
                    commit = %commit_sha,
                    events = batch_len,
                    "pushed commit"
                );
                crate::observability::metrics::increment_commits_pushed();
                crate::observability::metrics::increment_commit_bytes(commit_byte_total);
                self.record_push_outcome(PushStatus::Succeeded, Some(commit_sha)).await;
            }
            Ok(Ok(None)) => {
                debug!(branch = ?self.config.branch_key, "batch produced no net change, skipped commit");
            }
            Ok(Err(err)) => {
                error!(branch = ?self.config.branch_key, error = %err, "failed to commit and push batch");
                self.record_push_outcome(PushStatus::Failed, None).await;
            }
            Err(join_err) => {
                error!(branch = ?self.config.branch_key, error = %join_err, "commit task panicked");
                self.record_push_outcome(PushStatus::Failed, None).await;
            }
        }
    }

    async fn render_change(&self, event: &MirrorEvent) -> anyhow::Result<StagedChange> {
        let relative_path = PathBuf::from(event.identifier.canonical_path());
        if event.is_delete() {
            return Ok(StagedChange::Remove { relative_path });
        }
        let plaintext = event
            .sanitized_yaml
            .clone()
            .ok_or_else(|| anyhow::anyhow!("non-delete event missing sanitized body"))?;

        let contents = if let Some(tool) = &self.encryption_tool {
            if encrypt::should_encrypt(&event.identifier) {
                tool.encrypt(&plaintext).await.inspect_err(|_| {
                    crate::observability::metrics::increment_encryption_failures();
                })?
            } else {
                plaintext
            }
        } else {
            plaintext
        };

        Ok(StagedChange::Write { relative_path, contents })
    }
}

fn clone_staged_change(change: &StagedChange) -> StagedChange {
    match change {
        StagedChange::Write { relative_path, contents } => StagedChange::Write {
            relative_path: relative_path.clone(),
            contents: contents.clone(),
        },
        StagedChange::Remove { relative_path } => StagedChange::Remove {
            relative_path: relative_path.clone(),
        },
    }
}

fn commit_leading_line(rendered: &[(StagedChange, &MirrorEvent)]) -> String {
    if let [(_, event)] = rendered {
        format!(
            "[{}] {}/{} in {} by {}",
            event.operation.as_commit_tag(),
            event.identifier.resource,
            event.identifier.name,
            event.identifier.namespace.as_deref().unwrap_or("_cluster"),
            event.actor.username,
        )
    } else {
        format!("[BATCH] {} changes", rendered.len())
    }
}

fn fetch_pull_report(config: &WorkerConfig) -> anyhow::Result<PullReport> {
    let creds = config.credentials.clone();
    let repo = git_ops::ensure_clone(
        &config.repo_url,
        &config.default_branch,
        &config.branch_key.branch,
        &config.clone_path,
        creds.clone(),
    )?;
    let head_sha = git_ops::fetch(&repo, &config.branch_key.branch, creds)?;
    Ok(PullReport {
        branch_exists: head_sha.is_some(),
        head_sha,
        fetched_at: Utc::now(),
        last_push_time: None,
        last_push_status: None,
    })
}

fn commit_and_push(
    config: &WorkerConfig,
    changes: &[StagedChange],
    leading_line: &str,
    trailers: &[CommitTrailer],
) -> anyhow::Result<Option<String>> {
    let creds = config.credentials.clone();
    let repo = git_ops::ensure_clone(
        &config.repo_url,
        &config.default_branch,
        &config.branch_key.branch,
        &config.clone_path,
        creds.clone(),
    )?;

    let mut attempt = 0;
    loop {
        let commit_started = Instant::now();
        let commit = git_ops::commit_batch(
            &repo,
            &config.clone_path,
            changes,
            trailers,
            leading_line,
            &config.bot,
        )?;
        crate::observability::metrics::observe_commit_duration(commit_started.elapsed().as_secs_f64());
        let Some(commit_sha) = commit else {
            return Ok(None);
        };

        let push_started = Instant::now();
        let push_outcome = git_ops::push(&repo, &config.branch_key.branch, creds.clone())?;
        crate::observability::metrics::observe_push_duration(push_started.elapsed().as_secs_f64());

        match push_outcome {
            PushOutcome::Accepted => return Ok(Some(commit_sha)),
            PushOutcome::NonFastForward => {
                attempt += 1;
                crate::observability::metrics::increment_push_retries();
                if attempt > DEFAULT_PUSH_RETRY_LIMIT {
                    anyhow::bail!("push rejected after {attempt} replay attempts");
                }
                warn!(
                    branch = ?config.branch_key,
                    attempt,
                    "push rejected, replaying batch against new remote tip"
                );
                git_ops::fetch(&repo, &config.branch_key.branch, creds.clone())?;
                git_ops::hard_reset_to_remote(&repo, &config.branch_key.branch)?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActorIdentity, DestinationRef, Operation, ResourceIdentifier, StreamKey};
    use chrono::Utc;

    fn sample_event(name: &str, op: Operation) -> MirrorEvent {
        let is_delete = matches!(op, Operation::Delete);
        MirrorEvent {
            destination: DestinationRef::new("ns", "dest-a"),
            stream_key: StreamKey::new("ns", "repo", "main", "clusters/dev"),
            identifier: ResourceIdentifier::new("", "v1", "configmaps", Some("app-a".into()), name),
            operation: op,
            actor: ActorIdentity::new("alice", Utc::now()),
            sanitized_yaml: if is_delete { None } else { Some(b"data: {}\n".to_vec()) },
            content_fingerprint: if is_delete { None } else { Some(1) },
        }
    }

    #[test]
    fn single_event_leading_line_names_operation_kind_and_actor() {
        let event = sample_event("settings", Operation::Create);
        let change = StagedChange::Write {
            relative_path: PathBuf::from(event.identifier.canonical_path()),
            contents: vec![],
        };
        let rendered = vec![(change, &event)];
        let line = commit_leading_line(&rendered);
        assert!(line.starts_with("[CREATE] configmaps/settings in app-a by alice"));
    }

    #[test]
    fn multi_event_batch_uses_a_summary_leading_line() {
        let a = sample_event("a", Operation::Create);
        let b = sample_event("b", Operation::Update);
        let change_a = StagedChange::Write {
            relative_path: PathBuf::from(a.identifier.canonical_path()),
            contents: vec![],
        };
        let change_b = StagedChange::Write {
            relative_path: PathBuf::from(b.identifier.canonical_path()),
            contents: vec![],
        };
        let rendered = vec![(change_a, &a), (change_b, &b)];
        assert_eq!(commit_leading_line(&rendered), "[BATCH] 2 changes");
    }

    #[test]
    fn pending_batch_flushes_on_event_count_threshold() {
        let mut batch = PendingBatch::new();
        for i in 0..DEFAULT_FLUSH_MAX_EVENTS {
            batch.push(sample_event(&format!("cm-{i}"), Operation::Create));
        }
        assert!(batch.should_flush());
    }

    #[test]
    fn pending_batch_does_not_flush_below_thresholds() {
        let mut batch = PendingBatch::new();
        batch.push(sample_event("only-one", Operation::Create));
        assert!(!batch.should_flush());
    }

    #[tokio::test]
    async fn worker_handle_tracks_registered_destinations() {
        let config = WorkerConfig {
            branch_key: BranchKey::new("ns", "repo", "main"),
            repo_url: "https://example.invalid/repo.git".into(),
            default_branch: "main".into(),
            clone_path: PathBuf::from("/tmp/configbutler-test-clone"),
            bot: BotIdentity {
                name: "configbutler-bot".into(),
                email: "bot@configbutler.ai".into(),
            },
            credentials: GitCredentials::HttpsToken { token: String::new() },
        };
        let handle = WorkerHandle::spawn(config, None);
        let destination = DestinationRef::new("ns", "dest-a");
        handle.register_destination(destination.clone(), "clusters/dev".into()).await;
        assert_eq!(handle.destinations.lock().await.len(), 1);
        handle.unregister_destination(&destination).await;
        assert!(handle.destinations.lock().await.is_empty());
    }
}
