//! Event and key types shared across the router, streams, and workers.
//!
//! Events are tagged variants, not a type hierarchy: a single
//! [`Operation`] discriminator plus an optional sanitized object body, per
//! the "tagged variants over inheritance" design note. Cluster-scoped vs.
//! namespaced rule provenance likewise collapses into a single boolean
//! rather than parallel compiled-rule types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::identifier::ResourceIdentifier;

/// The kind of change that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    /// Single uppercase token used in commit message leading lines
    /// (`[OP] kind/name in ns/N by user/U`).
    #[must_use]
    pub fn as_commit_tag(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

/// `{username, timestamp}` — who caused an event and when it was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorIdentity {
    pub username: String,
    pub timestamp: DateTime<Utc>,
}

impl ActorIdentity {
    #[must_use]
    pub fn new(username: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            username: username.into(),
            timestamp,
        }
    }

    #[must_use]
    pub fn system(timestamp: DateTime<Utc>) -> Self {
        Self::new(crate::constants::SYSTEM_ACTOR_IDENTITY, timestamp)
    }
}

/// `{namespace, name}` of a `GitDestination`, used as a stable routing key
/// independent of the underlying repo/branch/folder it currently resolves
/// to (resolution can change across reconciles; the reference does not).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRef {
    pub namespace: String,
    pub name: String,
}

impl DestinationRef {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// `{repoNamespace, repoName, branch}` — identifies a branch worker. Two
/// destinations sharing a branch share a worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchKey {
    pub repo_namespace: String,
    pub repo_name: String,
    pub branch: String,
}

impl BranchKey {
    #[must_use]
    pub fn new(
        repo_namespace: impl Into<String>,
        repo_name: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            repo_namespace: repo_namespace.into(),
            repo_name: repo_name.into(),
            branch: branch.into(),
        }
    }
}

/// `{repoNamespace, repoName, branch, baseFolder}` — identifies a
/// destination stream. Enforced globally unique by the controllers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    pub repo_namespace: String,
    pub repo_name: String,
    pub branch: String,
    pub base_folder: String,
}

impl StreamKey {
    #[must_use]
    pub fn new(
        repo_namespace: impl Into<String>,
        repo_name: impl Into<String>,
        branch: impl Into<String>,
        base_folder: impl Into<String>,
    ) -> Self {
        Self {
            repo_namespace: repo_namespace.into(),
            repo_name: repo_name.into(),
            branch: branch.into(),
            base_folder: base_folder.into(),
        }
    }

    #[must_use]
    pub fn branch_key(&self) -> BranchKey {
        BranchKey::new(
            self.repo_namespace.clone(),
            self.repo_name.clone(),
            self.branch.clone(),
        )
    }
}

/// A live or reconciliation-emitted event carrying a single object change,
/// destined for one destination's stream.
#[derive(Debug, Clone)]
pub struct MirrorEvent {
    pub destination: DestinationRef,
    pub stream_key: StreamKey,
    pub identifier: ResourceIdentifier,
    pub operation: Operation,
    pub actor: ActorIdentity,
    /// Sanitized YAML body. Absent for DELETE events, where the object body
    /// is not required to remove the corresponding file.
    pub sanitized_yaml: Option<Vec<u8>>,
    /// Content fingerprint of `sanitized_yaml`, used for stream-level dedup.
    /// Absent for DELETE events.
    pub content_fingerprint: Option<u64>,
}

impl MirrorEvent {
    #[must_use]
    pub fn is_delete(&self) -> bool {
        matches!(self.operation, Operation::Delete)
    }
}

/// Signals an informer topology change affecting a specific destination.
/// Published by the watch manager, consumed by the folder reconciler.
#[derive(Debug, Clone)]
pub struct InformerStateChanged {
    pub destination: DestinationRef,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_key_derives_its_owning_branch_key() {
        let stream = StreamKey::new("ns", "repo", "main", "clusters/dev");
        let branch = stream.branch_key();
        assert_eq!(branch, BranchKey::new("ns", "repo", "main"));
    }

    #[test]
    fn operation_commit_tags_are_stable_uppercase_tokens() {
        assert_eq!(Operation::Create.as_commit_tag(), "CREATE");
        assert_eq!(Operation::Update.as_commit_tag(), "UPDATE");
        assert_eq!(Operation::Delete.as_commit_tag(), "DELETE");
    }
}
