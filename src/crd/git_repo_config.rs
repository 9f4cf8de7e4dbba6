//! `GitRepoConfig`: a Git remote plus the credentials and push policy used
//! to reach it. Referenced by one or more [`crate::crd::GitDestination`]s.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::crd::Condition;

/// Reference to the `Secret` carrying Git credentials, in the same
/// namespace as the `GitRepoConfig`. Expected keys: `token` for an HTTPS
/// personal-access-token remote, or `privateKey`/`passphrase` for SSH.
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub name: String,
}

/// Push batching policy for every branch worker backed by this repo.
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PushPolicy {
    /// Maximum age, as a Kubernetes duration string (e.g. `"20s"`), a
    /// buffered batch is allowed to sit before being flushed regardless of
    /// size. Defaults to the worker's built-in flush-age trigger when unset.
    #[serde(default)]
    pub interval: Option<String>,
    /// Maximum number of events batched into a single commit. Defaults to
    /// the worker's built-in flush-count trigger when unset.
    #[serde(default)]
    pub max_commits: Option<u32>,
}

/// Git remote and credential configuration shared by every destination and
/// branch worker backed by it.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "GitRepoConfig",
    group = "configbutler.ai",
    version = "v1alpha1",
    namespaced,
    status = "GitRepoConfigStatus",
    shortname = "grc",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Url","type":"string","jsonPath":".spec.repoUrl"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GitRepoConfigSpec {
    /// HTTPS or SSH remote URL.
    pub repo_url: String,
    /// Default branch cloned when a destination's target branch does not
    /// yet exist on the remote.
    #[serde(default = "default_branch")]
    pub default_branch: String,
    /// Branches destinations referencing this repo are permitted to push
    /// to. An empty list allows any branch.
    #[serde(default)]
    pub allowed_branches: Vec<String>,
    pub secret_ref: SecretRef,
    #[serde(default)]
    pub push: Option<PushPolicy>,
}

fn default_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitRepoConfigStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

impl GitRepoConfigSpec {
    /// Returns whether `branch` is permitted by `allowedBranches`. An empty
    /// list is "no restriction", matching the documented Non-goal of not
    /// requiring every repo to enumerate every branch up front.
    #[must_use]
    pub fn allows_branch(&self, branch: &str) -> bool {
        self.allowed_branches.is_empty() || self.allowed_branches.iter().any(|b| b == branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(allowed: Vec<&str>) -> GitRepoConfigSpec {
        GitRepoConfigSpec {
            repo_url: "https://example.invalid/repo.git".into(),
            default_branch: "main".into(),
            allowed_branches: allowed.into_iter().map(String::from).collect(),
            secret_ref: SecretRef { name: "git-creds".into() },
            push: None,
        }
    }

    #[test]
    fn empty_allowlist_allows_any_branch() {
        assert!(spec(vec![]).allows_branch("feature-x"));
    }

    #[test]
    fn non_empty_allowlist_rejects_unlisted_branches() {
        let s = spec(vec!["main", "release"]);
        assert!(s.allows_branch("release"));
        assert!(!s.allows_branch("feature-x"));
    }
}
