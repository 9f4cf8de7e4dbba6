//! # Watch manager
//!
//! Owns the set of dynamic informers the controller currently runs: one
//! Tokio task per discovered GVR, torn down and rebuilt whenever the rule
//! store's referenced resources change or the periodic discovery refresh
//! notices a new GVR came online.

pub mod discovery;
pub mod informer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::constants::{DEFAULT_DISCOVERY_REFRESH_SECS, DEFAULT_RULE_CHANGE_DEBOUNCE_SECS};
use crate::correlation::CorrelationStore;
use crate::router::EventRouter;
use crate::rules::RuleStore;

use discovery::{compute_desired_gvrs, DiscoveredGvr};

struct RunningInformer {
    gvr: DiscoveredGvr,
    handle: JoinHandle<()>,
}

/// Tracks the live informer set and (re)synchronizes it against the rule
/// store and API discovery. A GVR key is `group/version/resource`, unique
/// enough for the exclusion/intersection logic in [`discovery`].
pub struct WatchManager {
    client: Client,
    rule_store: Arc<RuleStore>,
    correlation_store: Arc<CorrelationStore>,
    router: Arc<EventRouter>,
    running: RwLock<HashMap<String, RunningInformer>>,
}

fn gvr_key(gvr: &DiscoveredGvr) -> String {
    format!("{}/{}/{}", gvr.api_resource.group, gvr.api_resource.version, gvr.api_resource.plural)
}

impl WatchManager {
    #[must_use]
    pub fn new(
        client: Client,
        rule_store: Arc<RuleStore>,
        correlation_store: Arc<CorrelationStore>,
        router: Arc<EventRouter>,
    ) -> Self {
        Self {
            client,
            rule_store,
            correlation_store,
            router,
            running: RwLock::new(HashMap::new()),
        }
    }

    /// Number of informers currently running. Exposed for the `ACTIVE_INFORMERS`
    /// gauge and for tests.
    pub async fn active_count(&self) -> usize {
        self.running.read().await.len()
    }

    /// Lists every live object currently matching one of `destination`'s
    /// rules, across every GVR this manager has an informer running for.
    /// A rule referencing a GVR with no running informer (a transient gap
    /// during resync, or a resource discovery never surfaced) contributes
    /// nothing rather than failing the whole call.
    pub async fn list_live_identifiers(
        &self,
        destination: &crate::model::DestinationRef,
    ) -> anyhow::Result<Vec<crate::model::ResourceIdentifier>> {
        let rules = self.rule_store.rules_for_destination(destination);
        if rules.is_empty() {
            return Ok(Vec::new());
        }

        let gvrs: Vec<DiscoveredGvr> = self
            .running
            .read()
            .await
            .values()
            .map(|informer| informer.gvr.clone())
            .collect();

        let mut identifiers = std::collections::HashSet::new();
        for gvr in &gvrs {
            let applicable: Vec<_> = rules
                .iter()
                .filter(|rule| rule.is_cluster_scoped == gvr.is_cluster_scoped)
                .filter(|rule| {
                    rule.matchers.iter().any(|m| {
                        m.matches_gvr(&gvr.api_resource.group, &gvr.api_resource.version, &gvr.api_resource.plural)
                    })
                })
                .collect();
            if applicable.is_empty() {
                continue;
            }

            let api: kube::Api<kube::core::DynamicObject> = kube::Api::all_with(self.client.clone(), &gvr.api_resource);
            let objects = api.list(&kube::api::ListParams::default()).await?;
            for object in objects.items {
                let Some(name) = object.metadata.name.clone() else {
                    continue;
                };
                let namespace = object.metadata.namespace.clone();
                let labels: HashMap<String, String> = object.metadata.labels.clone().unwrap_or_default().into_iter().collect();

                let matched = applicable.iter().any(|rule| {
                    (rule.is_cluster_scoped || rule.rule_namespace.as_deref() == namespace.as_deref())
                        && rule.label_selector.as_ref().is_none_or(|sel| sel.matches(&labels))
                });
                if !matched {
                    continue;
                }
                identifiers.insert(crate::model::ResourceIdentifier::new(
                    gvr.api_resource.group.clone(),
                    gvr.api_resource.version.clone(),
                    gvr.api_resource.plural.clone(),
                    namespace,
                    name,
                ));
            }
        }
        Ok(identifiers.into_iter().collect())
    }

    /// Fetches a single object by its canonical coordinates, tolerating the
    /// case where it no longer exists (the folder reconciler calls this for
    /// objects a moment-old `listLiveIdentifiers` snapshot already proved
    /// were live, but a fast delete can still race it).
    pub async fn fetch_object(
        &self,
        identifier: &crate::model::ResourceIdentifier,
    ) -> anyhow::Result<Option<kube::core::DynamicObject>> {
        let api_resource = kube::api::ApiResource {
            group: identifier.group.clone(),
            version: identifier.version.clone(),
            api_version: if identifier.group.is_empty() {
                identifier.version.clone()
            } else {
                format!("{}/{}", identifier.group, identifier.version)
            },
            kind: identifier.resource.clone(),
            plural: identifier.resource.clone(),
        };
        let api: kube::Api<kube::core::DynamicObject> = match &identifier.namespace {
            Some(ns) => kube::Api::namespaced_with(self.client.clone(), ns, &api_resource),
            None => kube::Api::all_with(self.client.clone(), &api_resource),
        };
        match api.get(&identifier.name).await {
            Ok(object) => Ok(Some(object)),
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Recomputes the desired GVR set and starts/stops informer tasks so
    /// the running set matches it. Safe to call repeatedly; a GVR already
    /// running is left untouched rather than restarted, so an in-flight
    /// watch is never interrupted by an unrelated rule change.
    pub async fn resync(&self) {
        let desired = match compute_desired_gvrs(&self.client, &self.rule_store).await {
            Ok(gvrs) => gvrs,
            Err(err) => {
                warn!(%err, "GVR discovery failed, keeping existing informer set");
                return;
            }
        };
        let desired_keys: std::collections::HashSet<String> = desired.iter().map(gvr_key).collect();

        let mut running = self.running.write().await;
        let mut changed_gvrs: Vec<DiscoveredGvr> = Vec::new();

        let stale: Vec<String> = running
            .keys()
            .filter(|key| !desired_keys.contains(*key))
            .cloned()
            .collect();
        for key in stale {
            if let Some(informer) = running.remove(&key) {
                informer.handle.abort();
                info!(resource = %key, "stopped informer, no longer referenced by any rule");
                changed_gvrs.push(informer.gvr);
            }
        }

        for gvr in desired {
            let key = gvr_key(&gvr);
            if running.contains_key(&key) {
                continue;
            }
            let handle = tokio::spawn(informer::run(
                self.client.clone(),
                gvr.clone(),
                Arc::clone(&self.rule_store),
                Arc::clone(&self.correlation_store),
                Arc::clone(&self.router),
            ));
            info!(resource = %key, "started dynamic informer");
            changed_gvrs.push(gvr.clone());
            running.insert(key, RunningInformer { gvr, handle });
        }

        crate::observability::metrics::set_active_informers(running.len() as i64);
        drop(running);

        self.notify_affected_destinations(&changed_gvrs).await;
    }

    /// Re-matches each GVR that just started or stopped against the rule
    /// store and publishes one `InformerStateChanged` control event per
    /// distinct destination affected, so the folder reconciler backing each
    /// one re-converges its base folder against the new topology.
    async fn notify_affected_destinations(&self, changed_gvrs: &[DiscoveredGvr]) {
        if changed_gvrs.is_empty() {
            return;
        }
        let mut affected = std::collections::HashSet::new();
        for rule in self.rule_store.snapshot() {
            let matches_any = changed_gvrs.iter().any(|gvr| {
                rule.is_cluster_scoped == gvr.is_cluster_scoped
                    && rule.matchers.iter().any(|m| {
                        m.matches_gvr(&gvr.api_resource.group, &gvr.api_resource.version, &gvr.api_resource.plural)
                    })
            });
            if matches_any {
                affected.insert(rule.destination);
            }
        }
        for destination in affected {
            self.router.notify_informer_state_changed(destination).await;
        }
    }

    /// Runs forever, resynchronizing on a debounced rule-store change
    /// signal and on a periodic discovery refresh. Intended to be spawned
    /// as its own task; cancel-safe since `resync` holds its lock only for
    /// the duration of a single pass.
    pub async fn run(self: Arc<Self>) {
        self.resync().await;

        let mut rule_changes = self.rule_store.change_channel();
        let mut discovery_tick = tokio::time::interval(Duration::from_secs(DEFAULT_DISCOVERY_REFRESH_SECS));
        discovery_tick.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                changed = rule_changes.changed() => {
                    if changed.is_err() {
                        warn!("rule store change channel closed, watch manager stopping");
                        return;
                    }
                    // Debounce: a burst of rule edits collapses into one resync.
                    // Any further changes that land during the sleep are still
                    // reflected, since `resync` always reads the current
                    // snapshot rather than anything carried on the channel.
                    tokio::time::sleep(Duration::from_secs(DEFAULT_RULE_CHANGE_DEBOUNCE_SECS)).await;
                    rule_changes.borrow_and_update();
                    self.resync().await;
                }
                _ = discovery_tick.tick() => {
                    self.resync().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gvr_key_is_group_version_plural() {
        let gvr = DiscoveredGvr {
            api_resource: kube::api::ApiResource {
                group: "apps".into(),
                version: "v1".into(),
                api_version: "apps/v1".into(),
                kind: "Deployment".into(),
                plural: "deployments".into(),
            },
            is_cluster_scoped: false,
        };
        assert_eq!(gvr_key(&gvr), "apps/v1/deployments");
    }
}
