//! `WatchRule`: a namespaced selection rule pointing at a
//! [`crate::crd::GitDestination`] in the same namespace.

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::crd::Condition;
use crate::model::Operation;

/// One resource matcher, mirroring [`crate::rules::ResourceMatcher`]'s
/// wire shape. Kept as a separate wire type (rather than reusing the
/// compiled form directly) so the compiled representation is free to
/// evolve without touching the CRD's on-disk schema.
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRule {
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub api_groups: Vec<String>,
    #[serde(default)]
    pub api_versions: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
}

/// Exact-match label selector, wire shape for [`crate::rules::LabelSelector`].
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSelector {
    #[serde(default)]
    pub match_labels: HashMap<String, String>,
}

#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "WatchRule",
    group = "configbutler.ai",
    version = "v1alpha1",
    namespaced,
    status = "WatchRuleStatus",
    shortname = "wr",
    printcolumn = r#"{"name":"Destination","type":"string","jsonPath":".spec.destinationRef.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WatchRuleSpec {
    /// Name of a `GitDestination` in this rule's own namespace.
    pub destination_ref: DestinationNameRef,
    #[serde(default)]
    pub object_selector: Option<ObjectSelector>,
    pub rules: Vec<ResourceRule>,
}

#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DestinationNameRef {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WatchRuleStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}
