//! `GitRepoConfig` reconciler: validates the remote and credentials it
//! names and probes reachability. Owns no worker or stream lifecycle —
//! those belong entirely to `GitDestination`, which references this kind
//! but does not wait on its reconcile to complete before acting (each
//! controller reconciles from its own informer cache independently, the
//! same `kube_runtime` convention used throughout this codebase).

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use kube::api::{Patch, PatchParams};
use kube::Api;
use kube_runtime::controller::Action;
use kube_runtime::{watcher, Controller};
use tracing::info;

use super::{error_policy, resolve_git_credentials, ControllerContext};
use crate::crd::{upsert_condition, Condition, GitRepoConfig, GitRepoConfigStatus};
use crate::errors::ReconcilerError;
use crate::worker::git_ops;

const CONTROLLER_NAME: &str = "gitrepoconfig-controller";
const KIND: &str = "GitRepoConfig";

/// Spawns this kind's reconcile loop as its own task.
pub fn spawn(client: kube::Client, ctx: Arc<ControllerContext>) -> tokio::task::JoinHandle<()> {
    let api: Api<GitRepoConfig> = Api::all(client);
    tokio::spawn(async move {
        Controller::new(api, watcher::Config::default())
            .shutdown_on_signal()
            .run(reconcile, |obj, err, ctx| on_error(&obj, err, &ctx), ctx)
            .for_each(|_| std::future::ready(()))
            .await;
        info!(kind = KIND, "controller stopped");
    })
}

fn on_error(obj: &Arc<GitRepoConfig>, error: &ReconcilerError, ctx: &Arc<ControllerContext>) -> Action {
    let key = super::resource_key(KIND, obj.metadata.namespace.as_deref(), obj.metadata.name.as_deref().unwrap_or("unknown"));
    error_policy(KIND, &key, error, ctx)
}

async fn reconcile(repo: Arc<GitRepoConfig>, ctx: Arc<ControllerContext>) -> Result<Action, ReconcilerError> {
    crate::observability::metrics::increment_reconciliations();
    let namespace = repo.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
    let name = repo.metadata.name.clone().unwrap_or_default();

    let credentials = resolve_git_credentials(
        &ctx.client,
        &namespace,
        &repo.spec.secret_ref.name,
        &repo.spec.repo_url,
        &ctx.config.git_clone_cache_root,
    )
    .await;

    let credentials = match credentials {
        Ok(c) => c,
        Err(err) => {
            patch_status(&ctx, &repo, &namespace, &name, false, err.reason(), &err.to_string()).await?;
            return Err(err);
        }
    };

    let repo_url = repo.spec.repo_url.clone();
    let probe = tokio::task::spawn_blocking(move || git_ops::probe_remote(&repo_url, credentials))
        .await
        .map_err(|e| ReconcilerError::Fatal(e.into()))?;

    match probe {
        Ok(()) => {
            patch_status(&ctx, &repo, &namespace, &name, true, "Reachable", "remote reachable and credentials valid").await?;
            ctx.reset_backoff(&super::resource_key(KIND, Some(&namespace), &name));
            Ok(super::default_requeue(ctx.config.reconcile_requeue))
        }
        Err(err) => {
            let reconciler_err = ReconcilerError::network_error(err);
            patch_status(&ctx, &repo, &namespace, &name, false, reconciler_err.reason(), &reconciler_err.to_string()).await?;
            Err(reconciler_err)
        }
    }
}

async fn patch_status(
    ctx: &ControllerContext,
    repo: &GitRepoConfig,
    namespace: &str,
    name: &str,
    ready: bool,
    reason: &str,
    message: &str,
) -> Result<(), ReconcilerError> {
    let api: Api<GitRepoConfig> = Api::namespaced(ctx.client.clone(), namespace);
    let mut conditions = repo.status.as_ref().map(|s| s.conditions.clone()).unwrap_or_default();
    let now = Utc::now();
    // `Available` reflects reachability (credentials resolved, remote probe
    // succeeded); `Ready` is this kind's summary condition. They carry the
    // same boolean here since this controller has nothing else to check, but
    // are tracked as two conditions per spec.md so `Available`'s reason
    // (`AuthenticationFailed`/`NetworkError`/...) is visible independently
    // of the summary.
    let (available, ready_condition) = if ready {
        (
            Condition::true_condition("Available", reason, message, now),
            Condition::true_condition("Ready", reason, message, now),
        )
    } else {
        (
            Condition::false_condition("Available", reason, message, now),
            Condition::false_condition("Ready", reason, message, now),
        )
    };
    upsert_condition(&mut conditions, available);
    upsert_condition(&mut conditions, ready_condition);

    let status = GitRepoConfigStatus {
        conditions,
        observed_generation: repo.metadata.generation,
    };
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(CONTROLLER_NAME), &Patch::Merge(patch))
        .await
        .map_err(|e| ReconcilerError::Fatal(e.into()))?;
    Ok(())
}
