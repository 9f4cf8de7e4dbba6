//! # CRD Validation Tests
//!
//! Comprehensive tests for all four CRD kinds to catch schema drift early.
//! These tests validate that sample resources deserialize correctly and
//! that their fields land where the controllers expect them.

use configbutler::crd::{
    ClusterWatchRuleSpec, GitDestinationSpec, GitRepoConfigSpec, WatchRuleSpec,
};
use configbutler::model::Operation;

#[test]
fn git_repo_config_with_all_fields() {
    let yaml = r#"
repoUrl: git@github.com:acme/fleet-state.git
defaultBranch: main
allowedBranches:
  - main
  - release
secretRef:
  name: fleet-state-git-creds
push:
  interval: "20s"
  maxCommits: 200
"#;
    let spec: GitRepoConfigSpec = serde_yaml::from_str(yaml).expect("should deserialize GitRepoConfig spec");
    assert_eq!(spec.repo_url, "git@github.com:acme/fleet-state.git");
    assert_eq!(spec.default_branch, "main");
    assert_eq!(spec.allowed_branches, vec!["main", "release"]);
    assert_eq!(spec.secret_ref.name, "fleet-state-git-creds");
    let push = spec.push.expect("push policy should be present");
    assert_eq!(push.interval.as_deref(), Some("20s"));
    assert_eq!(push.max_commits, Some(200));
    assert!(spec.allows_branch("main"));
    assert!(!spec.allows_branch("feature-x"));
}

#[test]
fn git_repo_config_defaults_branch_and_allows_any_branch_when_unset() {
    let yaml = r#"
repoUrl: https://github.com/acme/fleet-state.git
secretRef:
  name: fleet-state-git-creds
"#;
    let spec: GitRepoConfigSpec = serde_yaml::from_str(yaml).expect("should deserialize with defaults");
    assert_eq!(spec.default_branch, "main");
    assert!(spec.allowed_branches.is_empty());
    assert!(spec.allows_branch("anything"));
}

#[test]
fn git_destination_requires_repo_ref_branch_and_base_folder() {
    let yaml = r#"
repoRef:
  name: fleet-state
  namespace: configbutler-system
branch: main
baseFolder: clusters/dev
"#;
    let spec: GitDestinationSpec = serde_yaml::from_str(yaml).expect("should deserialize GitDestination spec");
    assert_eq!(spec.repo_ref.name, "fleet-state");
    assert_eq!(spec.repo_ref.namespace, "configbutler-system");
    assert_eq!(spec.branch, "main");
    assert_eq!(spec.base_folder, "clusters/dev");
}

#[test]
fn watch_rule_with_operations_and_object_selector() {
    let yaml = r#"
destinationRef:
  name: dest-a
objectSelector:
  matchLabels:
    team: payments
rules:
  - operations: ["CREATE", "UPDATE", "DELETE"]
    apiGroups: [""]
    apiVersions: ["v1"]
    resources: ["configmaps", "secrets"]
"#;
    let spec: WatchRuleSpec = serde_yaml::from_str(yaml).expect("should deserialize WatchRule spec");
    assert_eq!(spec.destination_ref.name, "dest-a");
    let selector = spec.object_selector.expect("object selector should be present");
    assert_eq!(selector.match_labels.get("team"), Some(&"payments".to_string()));
    assert_eq!(spec.rules.len(), 1);
    assert_eq!(
        spec.rules[0].operations,
        vec![Operation::Create, Operation::Update, Operation::Delete]
    );
    assert_eq!(spec.rules[0].resources, vec!["configmaps", "secrets"]);
}

#[test]
fn watch_rule_empty_matcher_lists_mean_match_all() {
    let yaml = r#"
destinationRef:
  name: dest-a
rules:
  - resources: ["*"]
"#;
    let spec: WatchRuleSpec = serde_yaml::from_str(yaml).expect("should deserialize with minimal matcher");
    assert!(spec.object_selector.is_none());
    assert!(spec.rules[0].operations.is_empty());
    assert!(spec.rules[0].api_groups.is_empty());
    assert_eq!(spec.rules[0].resources, vec!["*"]);
}

#[test]
fn cluster_watch_rule_carries_an_explicit_destination_namespace() {
    let yaml = r#"
destinationRef:
  namespace: configbutler-system
  name: dest-cluster
rules:
  - apiGroups: ["rbac.authorization.k8s.io"]
    apiVersions: ["v1"]
    resources: ["clusterroles", "clusterrolebindings"]
"#;
    let spec: ClusterWatchRuleSpec =
        serde_yaml::from_str(yaml).expect("should deserialize ClusterWatchRule spec");
    assert_eq!(spec.destination_ref.namespace, "configbutler-system");
    assert_eq!(spec.destination_ref.name, "dest-cluster");
    assert_eq!(spec.rules[0].resources, vec!["clusterroles", "clusterrolebindings"]);
}
