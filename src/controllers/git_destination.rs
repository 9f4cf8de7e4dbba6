//! `GitDestination` reconciler: the one kind that owns a branch worker and
//! a destination stream. Reconciling one validates the branch against its
//! `GitRepoConfig`, claims the `(repo, branch, baseFolder)` stream key
//! exclusively, spins up (or reuses) the worker backing that branch, and
//! keeps a [`crate::reconciler::FolderReconciler`] running for as long as
//! the destination exists. Deletion is handled inline (no finalizer): once
//! the object carries a `deletionTimestamp` this reconciler only tears
//! down its own registrations and lets the API server's garbage collector
//! remove the object once every controller has converged.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use kube::api::{Patch, PatchParams};
use kube::Api;
use kube_runtime::controller::Action;
use kube_runtime::{watcher, Controller};
use tracing::info;

use super::{error_policy, resolve_git_credentials, ControllerContext};
use crate::crd::{upsert_condition, Condition, GitDestination, GitDestinationStatus, GitRepoConfig, GitStatus, WorkerStatus};
use crate::errors::ReconcilerError;
use crate::model::{BranchKey, DestinationRef, StreamKey};
use crate::reconciler::{FolderReconciler, FolderReconcilerConfig};
use crate::stream::DestinationStream;
use crate::worker::encrypt::EncryptionTool;
use crate::worker::git_ops::BotIdentity;
use crate::worker::{WorkerConfig, WorkerHandle};

const CONTROLLER_NAME: &str = "gitdestination-controller";
const KIND: &str = "GitDestination";

pub fn spawn(client: kube::Client, ctx: Arc<ControllerContext>) -> tokio::task::JoinHandle<()> {
    let api: Api<GitDestination> = Api::all(client);
    tokio::spawn(async move {
        Controller::new(api, watcher::Config::default())
            .shutdown_on_signal()
            .run(reconcile, |obj, err, ctx| on_error(&obj, err, &ctx), ctx)
            .for_each(|_| std::future::ready(()))
            .await;
        info!(kind = KIND, "controller stopped");
    })
}

fn on_error(obj: &Arc<GitDestination>, error: &ReconcilerError, ctx: &Arc<ControllerContext>) -> Action {
    let key = super::resource_key(KIND, obj.metadata.namespace.as_deref(), obj.metadata.name.as_deref().unwrap_or("unknown"));
    error_policy(KIND, &key, error, ctx)
}

async fn reconcile(destination_cr: Arc<GitDestination>, ctx: Arc<ControllerContext>) -> Result<Action, ReconcilerError> {
    crate::observability::metrics::increment_reconciliations();
    let namespace = destination_cr.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
    let name = destination_cr.metadata.name.clone().unwrap_or_default();
    let destination = DestinationRef::new(namespace.clone(), name.clone());

    if destination_cr.metadata.deletion_timestamp.is_some() {
        teardown(&destination_cr, &destination, &ctx).await;
        return Ok(Action::await_change());
    }

    let stream_key = StreamKey::new(
        destination_cr.spec.repo_ref.namespace.clone(),
        destination_cr.spec.repo_ref.name.clone(),
        destination_cr.spec.branch.clone(),
        destination_cr.spec.base_folder.clone(),
    );

    match converge(&destination_cr, &destination, &ctx).await {
        Ok(worker) => {
            patch_status_available(&ctx, &destination_cr, &namespace, &name, &worker, &stream_key).await?;
            ctx.reset_backoff(&super::resource_key(KIND, Some(&namespace), &name));
            Ok(super::default_requeue(ctx.config.reconcile_requeue))
        }
        Err(err) => {
            patch_status_unavailable(&ctx, &destination_cr, &namespace, &name, &err).await?;
            Err(err)
        }
    }
}

async fn converge(
    destination_cr: &GitDestination,
    destination: &DestinationRef,
    ctx: &ControllerContext,
) -> Result<Arc<WorkerHandle>, ReconcilerError> {
    let repo_ref = &destination_cr.spec.repo_ref;
    let repo_api: Api<GitRepoConfig> = Api::namespaced(ctx.client.clone(), &repo_ref.namespace);
    let repo = repo_api
        .get(&repo_ref.name)
        .await
        .map_err(|e| ReconcilerError::Configuration(format!("repoRef '{}/{}' not found: {e}", repo_ref.namespace, repo_ref.name)))?;

    if !repo.spec.allows_branch(&destination_cr.spec.branch) {
        return Err(ReconcilerError::Configuration(format!(
            "branch '{}' is not in allowedBranches for GitRepoConfig '{}/{}'",
            destination_cr.spec.branch, repo_ref.namespace, repo_ref.name
        )));
    }

    let branch_key = BranchKey::new(repo_ref.namespace.clone(), repo_ref.name.clone(), destination_cr.spec.branch.clone());
    let stream_key = StreamKey::new(
        repo_ref.namespace.clone(),
        repo_ref.name.clone(),
        destination_cr.spec.branch.clone(),
        destination_cr.spec.base_folder.clone(),
    );

    ctx.claim_stream(&stream_key, destination).await?;

    let worker = match ctx.router.worker_for(&branch_key).await {
        Some(worker) => worker,
        None => {
            let credentials = resolve_git_credentials(
                &ctx.client,
                &repo_ref.namespace,
                &repo.spec.secret_ref.name,
                &repo.spec.repo_url,
                &ctx.config.git_clone_cache_root,
            )
            .await?;
            let clone_path = ctx.config.git_clone_cache_root.join(format!(
                "{}-{}-{}",
                repo_ref.namespace, repo_ref.name, destination_cr.spec.branch
            ));
            let scratch_dir = ctx.config.encryption_scratch_root.join(format!(
                "{}-{}-{}",
                repo_ref.namespace, repo_ref.name, destination_cr.spec.branch
            ));
            let encryption_tool = ctx
                .config
                .encryption_tool_path
                .as_ref()
                .map(|path| EncryptionTool::new(path.clone(), scratch_dir));
            let worker_config = WorkerConfig {
                branch_key: branch_key.clone(),
                repo_url: repo.spec.repo_url.clone(),
                default_branch: repo.spec.default_branch.clone(),
                clone_path,
                bot: BotIdentity {
                    name: ctx.config.bot_author_name.clone(),
                    email: ctx.config.bot_author_email.clone(),
                },
                credentials,
            };
            let worker = WorkerHandle::spawn(worker_config, encryption_tool);
            ctx.router.register_worker(branch_key.clone(), Arc::clone(&worker)).await;
            worker
        }
    };
    ctx.acquire_worker(&branch_key).await;
    worker
        .register_destination(destination.clone(), destination_cr.spec.base_folder.clone())
        .await;

    if ctx.router.stream_for(&stream_key).await.is_none() {
        let stream = DestinationStream::spawn(
            stream_key.clone(),
            crate::constants::DEFAULT_STREAM_CAPACITY,
            crate::constants::DEFAULT_STREAM_DEDUP_WINDOW,
            worker.event_sender(),
        );
        ctx.router.register_stream(stream_key.clone(), Arc::new(stream)).await;
        FolderReconciler::spawn(
            FolderReconcilerConfig {
                destination: destination.clone(),
                stream_key: stream_key.clone(),
            },
            Arc::clone(&ctx.watch_manager),
            Arc::clone(&ctx.router),
        )
        .await;
    }

    crate::observability::metrics::set_active_workers(ctx.active_worker_count().await as i64);
    Ok(worker)
}

/// Unregisters this destination's stream, folder reconciler, and worker
/// registration. The last destination to release a given branch worker
/// also removes the worker from the router, leaving its background task
/// running to drain any in-flight batch rather than aborting it.
async fn teardown(destination_cr: &GitDestination, destination: &DestinationRef, ctx: &ControllerContext) {
    let repo_ref = &destination_cr.spec.repo_ref;
    let branch_key = BranchKey::new(repo_ref.namespace.clone(), repo_ref.name.clone(), destination_cr.spec.branch.clone());
    let stream_key = StreamKey::new(
        repo_ref.namespace.clone(),
        repo_ref.name.clone(),
        destination_cr.spec.branch.clone(),
        destination_cr.spec.base_folder.clone(),
    );

    ctx.router.unregister_reconciler(destination).await;
    ctx.router.unregister_stream(&stream_key).await;
    ctx.release_stream(&stream_key).await;

    if let Some(worker) = ctx.router.worker_for(&branch_key).await {
        worker.unregister_destination(destination).await;
    }
    if ctx.release_worker(&branch_key).await == 0 {
        ctx.router.unregister_worker(&branch_key).await;
        info!(?destination, "last destination released, worker unregistered");
    }
}

/// Reconciliation converged: `Available=True` (repo resolved, branch
/// allowed, stream claimed, worker running) and `Active=True` (this
/// destination is registered against that worker). `Ready` summarizes only
/// those two. `Synced` is read from the worker's own cached push state and
/// tracked separately — a destination can be `Ready=True` while its last
/// push is still failing, which is exactly the state `Synced=False` exists
/// to surface without flapping the summary condition.
async fn patch_status_available(
    ctx: &ControllerContext,
    destination_cr: &GitDestination,
    namespace: &str,
    name: &str,
    worker: &WorkerHandle,
    stream_key: &StreamKey,
) -> Result<(), ReconcilerError> {
    let now = Utc::now();
    let mut conditions = destination_cr.status.as_ref().map(|s| s.conditions.clone()).unwrap_or_default();
    upsert_condition(&mut conditions, Condition::true_condition("Available", "Reachable", "repo and branch resolved, worker running", now));
    upsert_condition(&mut conditions, Condition::true_condition("Active", "DestinationRegistered", "destination registered with its branch worker", now));

    let (git_status, synced_condition) = match worker.sync_and_get_metadata().await {
        Ok(report) => {
            let git_status = GitStatus {
                branch_exists: report.branch_exists,
                last_commit_sha: report.head_sha,
                last_checked: Some(report.fetched_at.to_rfc3339()),
            };
            let synced = match report.last_push_status {
                Some(crate::worker::PushStatus::Succeeded) | None => {
                    Condition::true_condition("Synced", "UpToDate", "last push succeeded or no push attempted yet", now)
                }
                Some(crate::worker::PushStatus::Failed) => {
                    Condition::false_condition("Synced", "GitOperationFailed", "last push to the branch failed", now)
                }
            };
            (Some(git_status), synced)
        }
        Err(err) => (
            None,
            Condition::false_condition("Synced", "GitOperationFailed", &err.to_string(), now),
        ),
    };
    let synced = synced_condition.status == "True";
    upsert_condition(&mut conditions, synced_condition);
    // Ready summarizes Available and Active only: this function runs after
    // converge() has already established both, so Ready is always True here.
    // Synced is tracked as its own condition and does not gate it.
    upsert_condition(
        &mut conditions,
        Condition::true_condition("Ready", "Synced", "destination is available and active", now),
    );

    let queued_events = match ctx.router.stream_for(stream_key).await {
        Some(stream) => stream.queue_depth().await as i64,
        None => 0,
    };
    let worker_status = WorkerStatus {
        active: true,
        queued_events,
        last_push_time: git_status.as_ref().and_then(|g| g.last_checked.clone()),
        last_push_status: git_status.as_ref().map(|_| if synced { "Succeeded".to_string() } else { "Failed".to_string() }),
    };

    patch_status(ctx, destination_cr, namespace, name, conditions, git_status, Some(worker_status)).await
}

/// Reconciliation failed before (or while) converging: `Available=False`
/// with the error's own reason, `Active=False` (no worker registration can
/// be asserted), `Ready=False`. `gitStatus` is left unset per the status
/// design: it is only populated once `Available=True`.
async fn patch_status_unavailable(
    ctx: &ControllerContext,
    destination_cr: &GitDestination,
    namespace: &str,
    name: &str,
    error: &ReconcilerError,
) -> Result<(), ReconcilerError> {
    let now = Utc::now();
    let mut conditions = destination_cr.status.as_ref().map(|s| s.conditions.clone()).unwrap_or_default();
    upsert_condition(&mut conditions, Condition::false_condition("Available", error.reason(), &error.to_string(), now));
    upsert_condition(&mut conditions, Condition::false_condition("Active", error.reason(), "no worker registration while unavailable", now));
    upsert_condition(&mut conditions, Condition::false_condition("Synced", error.reason(), "cannot sync while unavailable", now));
    upsert_condition(&mut conditions, Condition::false_condition("Ready", error.reason(), &error.to_string(), now));

    patch_status(ctx, destination_cr, namespace, name, conditions, None, None).await
}

async fn patch_status(
    ctx: &ControllerContext,
    destination_cr: &GitDestination,
    namespace: &str,
    name: &str,
    conditions: Vec<Condition>,
    git_status: Option<GitStatus>,
    worker_status: Option<WorkerStatus>,
) -> Result<(), ReconcilerError> {
    let api: Api<GitDestination> = Api::namespaced(ctx.client.clone(), namespace);
    let status = GitDestinationStatus {
        conditions,
        git_status,
        worker_status,
        observed_generation: destination_cr.metadata.generation,
    };
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(CONTROLLER_NAME), &Patch::Merge(patch))
        .await
        .map_err(|e| ReconcilerError::Fatal(e.into()))?;
    Ok(())
}
