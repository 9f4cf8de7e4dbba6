//! Resolves the set of GVRs this controller should run a dynamic informer
//! for: the intersection of what the rule store currently references and
//! what the API server's discovery document actually exposes, minus the
//! hard-coded exclusion list.

use std::collections::HashSet;

use kube::api::ApiResource;
use kube::discovery::{Discovery, Scope};
use kube::Client;

use crate::constants::DEFAULT_GVR_EXCLUSIONS;
use crate::rules::RuleStore;

/// One discovered, selectable resource: its `ApiResource` (everything
/// `kube::Api::all_with`/`namespaced_with` needs) plus whether it is
/// cluster-scoped.
#[derive(Debug, Clone)]
pub struct DiscoveredGvr {
    pub api_resource: ApiResource,
    pub is_cluster_scoped: bool,
}

fn is_excluded(group: &str, version: &str, resource: &str) -> bool {
    DEFAULT_GVR_EXCLUSIONS
        .iter()
        .any(|(g, v, r)| *g == group && *v == version && *r == resource)
}

/// Runs API discovery and intersects it with the rule store's referenced
/// resource plurals, dropping anything on the exclusion list. Resources
/// named `*` by at least one rule are not expanded here — a literal
/// wildcard resource name never matches a discovered plural, so a `*`
/// matcher only ever widens an already-selected resource's operation,
/// group, or version dimension, never adds new GVRs by itself.
pub async fn compute_desired_gvrs(client: &Client, rule_store: &RuleStore) -> anyhow::Result<Vec<DiscoveredGvr>> {
    let referenced: HashSet<String> = rule_store
        .referenced_resource_plurals()
        .into_iter()
        .map(|r| r.split('/').next().unwrap_or(&r).to_ascii_lowercase())
        .collect();
    if referenced.is_empty() {
        return Ok(Vec::new());
    }

    let discovery = Discovery::new(client.clone()).run().await?;
    let mut out = Vec::new();
    for group in discovery.groups() {
        for (api_resource, capabilities) in group.recommended_resources() {
            if is_excluded(&api_resource.group, &api_resource.version, &api_resource.plural) {
                continue;
            }
            if !referenced.contains(&api_resource.plural.to_ascii_lowercase()) {
                continue;
            }
            out.push(DiscoveredGvr {
                is_cluster_scoped: matches!(capabilities.scope, Scope::Cluster),
                api_resource,
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusion_list_blocks_pods_and_jobs() {
        assert!(is_excluded("", "v1", "pods"));
        assert!(is_excluded("batch", "v1", "jobs"));
        assert!(!is_excluded("", "v1", "configmaps"));
    }
}
