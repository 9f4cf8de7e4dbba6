//! `ClusterWatchRule`: a cluster-scoped selection rule. Unlike
//! [`crate::crd::WatchRule`], which implicitly targets a destination in
//! its own namespace, a cluster-scoped rule has no owning namespace and
//! must name the destination's namespace explicitly.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::crd::watch_rule::{ObjectSelector, ResourceRule};
use crate::crd::Condition;
use crate::model::DestinationRef;

#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "ClusterWatchRule",
    group = "configbutler.ai",
    version = "v1alpha1",
    status = "ClusterWatchRuleStatus",
    shortname = "cwr",
    printcolumn = r#"{"name":"Destination","type":"string","jsonPath":".spec.destinationRef.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterWatchRuleSpec {
    pub destination_ref: DestinationRef,
    #[serde(default)]
    pub object_selector: Option<ObjectSelector>,
    pub rules: Vec<ResourceRule>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterWatchRuleStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}
