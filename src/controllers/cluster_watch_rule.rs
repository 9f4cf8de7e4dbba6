//! `ClusterWatchRule` reconciler: the cluster-scoped counterpart to
//! [`crate::crd::WatchRule`]. Has no owning namespace, so `destinationRef`
//! must name the target `GitDestination`'s namespace explicitly.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use kube::api::{Patch, PatchParams};
use kube::Api;
use kube_runtime::controller::Action;
use kube_runtime::{watcher, Controller};
use tracing::info;

use super::{error_policy, ControllerContext};
use crate::crd::{upsert_condition, ClusterWatchRule, ClusterWatchRuleStatus, Condition, GitDestination};
use crate::errors::ReconcilerError;
use crate::rules::{CompiledRule, LabelSelector, ResourceMatcher, RuleRef};

const CONTROLLER_NAME: &str = "clusterwatchrule-controller";
const KIND: &str = "ClusterWatchRule";

pub fn spawn(client: kube::Client, ctx: Arc<ControllerContext>) -> tokio::task::JoinHandle<()> {
    let api: Api<ClusterWatchRule> = Api::all(client);
    tokio::spawn(async move {
        Controller::new(api, watcher::Config::default())
            .shutdown_on_signal()
            .run(reconcile, |obj, err, ctx| on_error(&obj, err, &ctx), ctx)
            .for_each(|_| std::future::ready(()))
            .await;
        info!(kind = KIND, "controller stopped");
    })
}

fn on_error(obj: &Arc<ClusterWatchRule>, error: &ReconcilerError, ctx: &Arc<ControllerContext>) -> Action {
    let key = super::resource_key(KIND, None, obj.metadata.name.as_deref().unwrap_or("unknown"));
    error_policy(KIND, &key, error, ctx)
}

async fn reconcile(rule_cr: Arc<ClusterWatchRule>, ctx: Arc<ControllerContext>) -> Result<Action, ReconcilerError> {
    crate::observability::metrics::increment_reconciliations();
    let name = rule_cr.metadata.name.clone().unwrap_or_default();
    let rule_ref = RuleRef {
        namespace: None,
        name: name.clone(),
    };

    if rule_cr.metadata.deletion_timestamp.is_some() {
        ctx.rule_store.delete_rule(&rule_ref);
        return Ok(Action::await_change());
    }

    match compile(&rule_cr, &ctx, rule_ref.clone()).await {
        Ok(compiled) => {
            ctx.rule_store.upsert_rule(compiled);
            patch_ready(&ctx, &rule_cr, &name, true, "Compiled", "rule compiled and active").await?;
            ctx.reset_backoff(&super::resource_key(KIND, None, &name));
            Ok(super::default_requeue(ctx.config.reconcile_requeue))
        }
        Err(err) => {
            ctx.rule_store.delete_rule(&rule_ref);
            patch_ready(&ctx, &rule_cr, &name, false, err.reason(), &err.to_string()).await?;
            Err(err)
        }
    }
}

async fn compile(rule_cr: &ClusterWatchRule, ctx: &ControllerContext, rule_ref: RuleRef) -> Result<CompiledRule, ReconcilerError> {
    let destination_ref = &rule_cr.spec.destination_ref;
    let destination_api: Api<GitDestination> = Api::namespaced(ctx.client.clone(), &destination_ref.namespace);
    let destination_cr = destination_api.get(&destination_ref.name).await.map_err(|e| {
        ReconcilerError::Configuration(format!(
            "destinationRef '{}/{}' not found: {e}",
            destination_ref.namespace, destination_ref.name
        ))
    })?;

    let repo_ref = &destination_cr.spec.repo_ref;
    let label_selector = rule_cr.spec.object_selector.as_ref().map(|sel| LabelSelector {
        match_labels: sel.match_labels.clone(),
    });
    let matchers: Vec<ResourceMatcher> = rule_cr
        .spec
        .rules
        .iter()
        .map(|r| ResourceMatcher {
            operations: r.operations.clone(),
            api_groups: r.api_groups.clone(),
            api_versions: r.api_versions.clone(),
            resources: r.resources.clone(),
        })
        .collect();

    Ok(CompiledRule {
        rule_ref,
        destination: destination_ref.clone(),
        repo_namespace: repo_ref.namespace.clone(),
        repo_name: repo_ref.name.clone(),
        branch: destination_cr.spec.branch.clone(),
        base_folder: destination_cr.spec.base_folder.clone(),
        is_cluster_scoped: true,
        rule_namespace: None,
        label_selector,
        matchers,
    })
}

async fn patch_ready(
    ctx: &ControllerContext,
    rule_cr: &ClusterWatchRule,
    name: &str,
    ready: bool,
    reason: &str,
    message: &str,
) -> Result<(), ReconcilerError> {
    let api: Api<ClusterWatchRule> = Api::all(ctx.client.clone());
    let mut conditions = rule_cr.status.as_ref().map(|s| s.conditions.clone()).unwrap_or_default();
    let condition = if ready {
        Condition::true_condition("Ready", reason, message, Utc::now())
    } else {
        Condition::false_condition("Ready", reason, message, Utc::now())
    };
    upsert_condition(&mut conditions, condition);

    let status = ClusterWatchRuleStatus {
        conditions,
        observed_generation: rule_cr.metadata.generation,
    };
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(CONTROLLER_NAME), &Patch::Merge(patch))
        .await
        .map_err(|e| ReconcilerError::Fatal(e.into()))?;
    Ok(())
}
