//! `WatchRule` reconciler: compiles a namespaced selection rule into a
//! [`CompiledRule`] and keeps it upserted in the shared [`RuleStore`].
//! Resolution of `destinationRef` is implicit to this rule's own
//! namespace, unlike [`crate::crd::ClusterWatchRule`] which must name one
//! explicitly.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use kube::api::{Patch, PatchParams};
use kube::Api;
use kube_runtime::controller::Action;
use kube_runtime::{watcher, Controller};
use tracing::info;

use super::{error_policy, ControllerContext};
use crate::crd::{upsert_condition, Condition, GitDestination, WatchRule, WatchRuleStatus};
use crate::errors::ReconcilerError;
use crate::model::DestinationRef;
use crate::rules::{CompiledRule, LabelSelector, ResourceMatcher, RuleRef};

const CONTROLLER_NAME: &str = "watchrule-controller";
const KIND: &str = "WatchRule";

pub fn spawn(client: kube::Client, ctx: Arc<ControllerContext>) -> tokio::task::JoinHandle<()> {
    let api: Api<WatchRule> = Api::all(client);
    tokio::spawn(async move {
        Controller::new(api, watcher::Config::default())
            .shutdown_on_signal()
            .run(reconcile, |obj, err, ctx| on_error(&obj, err, &ctx), ctx)
            .for_each(|_| std::future::ready(()))
            .await;
        info!(kind = KIND, "controller stopped");
    })
}

fn on_error(obj: &Arc<WatchRule>, error: &ReconcilerError, ctx: &Arc<ControllerContext>) -> Action {
    let key = super::resource_key(KIND, obj.metadata.namespace.as_deref(), obj.metadata.name.as_deref().unwrap_or("unknown"));
    error_policy(KIND, &key, error, ctx)
}

async fn reconcile(rule_cr: Arc<WatchRule>, ctx: Arc<ControllerContext>) -> Result<Action, ReconcilerError> {
    crate::observability::metrics::increment_reconciliations();
    let namespace = rule_cr.metadata.namespace.clone().unwrap_or_else(|| "default".to_string());
    let name = rule_cr.metadata.name.clone().unwrap_or_default();
    let rule_ref = RuleRef {
        namespace: Some(namespace.clone()),
        name: name.clone(),
    };

    if rule_cr.metadata.deletion_timestamp.is_some() {
        ctx.rule_store.delete_rule(&rule_ref);
        return Ok(Action::await_change());
    }

    match compile(&rule_cr, &namespace, &ctx, rule_ref.clone()).await {
        Ok(compiled) => {
            ctx.rule_store.upsert_rule(compiled);
            patch_ready(&ctx, &rule_cr, &namespace, &name, true, "Compiled", "rule compiled and active").await?;
            ctx.reset_backoff(&super::resource_key(KIND, Some(&namespace), &name));
            Ok(super::default_requeue(ctx.config.reconcile_requeue))
        }
        Err(err) => {
            ctx.rule_store.delete_rule(&rule_ref);
            patch_ready(&ctx, &rule_cr, &namespace, &name, false, err.reason(), &err.to_string()).await?;
            Err(err)
        }
    }
}

async fn compile(
    rule_cr: &WatchRule,
    namespace: &str,
    ctx: &ControllerContext,
    rule_ref: RuleRef,
) -> Result<CompiledRule, ReconcilerError> {
    let destination_api: Api<GitDestination> = Api::namespaced(ctx.client.clone(), namespace);
    let destination_name = &rule_cr.spec.destination_ref.name;
    let destination_cr = destination_api.get(destination_name).await.map_err(|e| {
        ReconcilerError::Configuration(format!("destinationRef '{destination_name}' not found in namespace '{namespace}': {e}"))
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
        destination: DestinationRef::new(namespace, destination_name.clone()),
        repo_namespace: repo_ref.namespace.clone(),
        repo_name: repo_ref.name.clone(),
        branch: destination_cr.spec.branch.clone(),
        base_folder: destination_cr.spec.base_folder.clone(),
        is_cluster_scoped: false,
        rule_namespace: Some(namespace.to_string()),
        label_selector,
        matchers,
    })
}

async fn patch_ready(
    ctx: &ControllerContext,
    rule_cr: &WatchRule,
    namespace: &str,
    name: &str,
    ready: bool,
    reason: &str,
    message: &str,
) -> Result<(), ReconcilerError> {
    let api: Api<WatchRule> = Api::namespaced(ctx.client.clone(), namespace);
    let mut conditions = rule_cr.status.as_ref().map(|s| s.conditions.clone()).unwrap_or_default();
    let condition = if ready {
        Condition::true_condition("Ready", reason, message, Utc::now())
    } else {
        Condition::false_condition("Ready", reason, message, Utc::now())
    };
    upsert_condition(&mut conditions, condition);

    let status = WatchRuleStatus {
        conditions,
        observed_generation: rule_cr.metadata.generation,
    };
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(CONTROLLER_NAME), &Patch::Merge(patch))
        .await
        .map_err(|e| ReconcilerError::Fatal(e.into()))?;
    Ok(())
}
