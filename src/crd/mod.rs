//! # Custom resource definitions
//!
//! The four kinds this controller reconciles, all in group
//! `configbutler.ai`, version `v1alpha1`. Each submodule owns one kind's
//! spec/status; [`condition`] holds the shared `Condition` type every
//! status uses.

pub mod cluster_watch_rule;
pub mod condition;
pub mod git_destination;
pub mod git_repo_config;
pub mod watch_rule;

pub use cluster_watch_rule::{ClusterWatchRule, ClusterWatchRuleSpec, ClusterWatchRuleStatus};
pub use condition::{upsert_condition, Condition};
pub use git_destination::{
    GitDestination, GitDestinationSpec, GitDestinationStatus, GitStatus, RepoConfigRef, WorkerStatus,
};
pub use git_repo_config::{GitRepoConfig, GitRepoConfigSpec, GitRepoConfigStatus, PushPolicy, SecretRef};
pub use watch_rule::{DestinationNameRef, ObjectSelector, ResourceRule, WatchRule, WatchRuleSpec, WatchRuleStatus};
