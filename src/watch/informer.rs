//! One dynamic informer: watches a single GVR cluster-wide and turns each
//! delta into zero or more [`MirrorEvent`]s, one per matching compiled
//! rule, routed through the [`EventRouter`].

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use kube::api::ApiResource;
use kube::{Api, Client};
use kube_runtime::watcher;
use tracing::{debug, warn};

use crate::correlation::{CorrelationKey, CorrelationStore};
use crate::model::{ActorIdentity, MirrorEvent, Operation, ResourceIdentifier, StreamKey};
use crate::router::EventRouter;
use crate::rules::RuleStore;
use crate::sanitize;

use super::discovery::DiscoveredGvr;

/// Runs a single GVR's watch loop until the task is aborted by the
/// supervisor (on rule-store or discovery-driven teardown). Never returns
/// on its own; a broken watch stream is recreated by `kube_runtime`'s own
/// backoff internally, so this loop only exits via task cancellation.
pub async fn run(
    client: Client,
    gvr: DiscoveredGvr,
    rule_store: Arc<RuleStore>,
    correlation_store: Arc<CorrelationStore>,
    router: Arc<EventRouter>,
) {
    // Always watched cluster-wide: a namespaced GVR's rules each carry their
    // own namespace restriction, applied in `handle_change` via
    // `RuleStore::matches`, not via a namespace-scoped `Api`.
    let api: Api<kube::core::DynamicObject> = Api::all_with(client, &gvr.api_resource);

    let mut stream = Box::pin(watcher::watcher(api, watcher::Config::default()));
    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Apply(obj)) => {
                handle_change(&gvr.api_resource, &obj, false, &rule_store, &correlation_store, &router).await;
            }
            Ok(watcher::Event::Delete(obj)) => {
                handle_change(&gvr.api_resource, &obj, true, &rule_store, &correlation_store, &router).await;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(resource = %gvr.api_resource.plural, error = %err, "informer watch stream error");
            }
        }
    }
}

async fn handle_change(
    ar: &ApiResource,
    obj: &kube::core::DynamicObject,
    is_delete: bool,
    rule_store: &RuleStore,
    correlation_store: &CorrelationStore,
    router: &EventRouter,
) {
    let Some(name) = obj.metadata.name.clone() else {
        return;
    };
    let namespace = obj.metadata.namespace.clone();
    let labels: HashMap<String, String> = obj
        .metadata
        .labels
        .clone()
        .unwrap_or_default()
        .into_iter()
        .collect();
    let is_cluster_scoped = namespace.is_none();
    let identifier = ResourceIdentifier::new(ar.group.clone(), ar.version.clone(), ar.plural.clone(), namespace.clone(), name);

    let matches = rule_store.matches(
        &ar.plural,
        None,
        if is_delete { Operation::Delete } else { Operation::Update },
        &ar.group,
        &ar.version,
        is_cluster_scoped,
        namespace.as_deref(),
        &labels,
    );
    if matches.is_empty() {
        return;
    }

    if is_delete {
        for rule in matches {
            let stream_key = StreamKey::new(rule.repo_namespace, rule.repo_name, rule.branch, rule.base_folder);
            let event = MirrorEvent {
                destination: rule.destination,
                stream_key,
                identifier: identifier.clone(),
                operation: Operation::Delete,
                actor: ActorIdentity::system(chrono::Utc::now()),
                sanitized_yaml: None,
                content_fingerprint: None,
            };
            crate::observability::metrics::increment_events_ingested(Operation::Delete.as_commit_tag(), "watch");
            router.route_event(event).await;
        }
        return;
    }

    let value = match serde_json::to_value(obj) {
        Ok(v) => v,
        Err(err) => {
            warn!(%err, identifier = %identifier, "failed to serialize watched object");
            return;
        }
    };
    let Ok(canonical) = sanitize::canonical_bytes(&value) else {
        warn!(identifier = %identifier, "failed to sanitize watched object");
        return;
    };
    let fingerprint = crate::fingerprint::content_fingerprint(&canonical);

    let (operation, actor) = resolve_operation_and_actor(correlation_store, &identifier, fingerprint);

    for rule in matches {
        let stream_key = StreamKey::new(rule.repo_namespace, rule.repo_name, rule.branch, rule.base_folder);
        let event = MirrorEvent {
            destination: rule.destination,
            stream_key,
            identifier: identifier.clone(),
            operation,
            actor: actor.clone(),
            sanitized_yaml: Some(canonical.clone()),
            content_fingerprint: Some(fingerprint),
        };
        crate::observability::metrics::increment_events_ingested(operation.as_commit_tag(), "watch");
        router.route_event(event).await;
    }
}

/// An `Apply` delta from `kube_runtime`'s watcher does not itself
/// distinguish a create from an update. Both are attempted against the
/// correlation store, preferring a `Create` hit (an admission webhook
/// fires once per API call, so a `Create`-keyed entry can only exist if
/// the object really was just created); a correlation miss on both
/// defaults to `Update` with the system actor, since a stale bootstrap
/// watch restart is far more common than a genuinely uncorrelated create.
fn resolve_operation_and_actor(
    correlation_store: &CorrelationStore,
    identifier: &ResourceIdentifier,
    fingerprint: u64,
) -> (Operation, ActorIdentity) {
    let create_key = CorrelationKey::new(identifier, Operation::Create, fingerprint);
    if let Some(identity) = correlation_store.take_one(&create_key) {
        crate::observability::metrics::increment_enrichment_hits();
        return (Operation::Create, identity);
    }
    let update_key = CorrelationKey::new(identifier, Operation::Update, fingerprint);
    if let Some(identity) = correlation_store.take_one(&update_key) {
        crate::observability::metrics::increment_enrichment_hits();
        return (Operation::Update, identity);
    }
    crate::observability::metrics::increment_enrichment_misses();
    debug!(%identifier, "no correlation hit, attributing to system actor");
    (Operation::Update, ActorIdentity::system(chrono::Utc::now()))
}
