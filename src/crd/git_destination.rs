//! `GitDestination`: one `(repo, branch, baseFolder)` mirror target. The
//! unit [`crate::crd::WatchRule`]s and [`crate::crd::ClusterWatchRule`]s
//! point at.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::crd::Condition;

/// Reference to a [`crate::crd::GitRepoConfig`], which may live in a
/// different namespace than the destination itself (the repo config is
/// typically centrally managed while destinations are per-team).
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RepoConfigRef {
    pub name: String,
    pub namespace: String,
}

#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "GitDestination",
    group = "configbutler.ai",
    version = "v1alpha1",
    namespaced,
    status = "GitDestinationStatus",
    shortname = "gd",
    printcolumn = r#"{"name":"Branch","type":"string","jsonPath":".spec.branch"}"#,
    printcolumn = r#"{"name":"BaseFolder","type":"string","jsonPath":".spec.baseFolder"}"#,
    printcolumn = r#"{"name":"Active","type":"string","jsonPath":".status.conditions[?(@.type==\"Active\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GitDestinationSpec {
    pub repo_ref: RepoConfigRef,
    pub branch: String,
    /// Root directory, relative to the repository root, under which this
    /// destination's objects are mirrored. Must be unique per
    /// `(repo, branch)` across every `GitDestination`; collisions are
    /// rejected at admission time by the controller.
    pub base_folder: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitStatus {
    #[serde(default)]
    pub branch_exists: bool,
    #[serde(default)]
    pub last_commit_sha: Option<String>,
    #[serde(default)]
    pub last_checked: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub queued_events: i64,
    #[serde(default)]
    pub last_push_time: Option<String>,
    #[serde(default)]
    pub last_push_status: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitDestinationStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub git_status: Option<GitStatus>,
    #[serde(default)]
    pub worker_status: Option<WorkerStatus>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}
