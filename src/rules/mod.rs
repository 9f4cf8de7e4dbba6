//! # Rule store
//!
//! Holds a compiled, in-memory snapshot of all active selection rules and
//! answers "which destinations want this object?" in O(matches). Writes
//! come from the four CRD controllers (Kubernetes serializes them);
//! `matches` is called concurrently by every informer callback, so the
//! store is guarded by a read-write lock rather than a plain mutex.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::model::{DestinationRef, Operation};

/// A single resource matcher within a compiled rule. Each set, when empty,
/// means "match all"; `*` matches everything in that dimension; a plural of
/// the form `x/*` matches all subresources of `x`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMatcher {
    pub operations: Vec<Operation>,
    pub api_groups: Vec<String>,
    pub api_versions: Vec<String>,
    pub resources: Vec<String>,
}

impl ResourceMatcher {
    fn matches_operation(&self, operation: Operation) -> bool {
        self.operations.is_empty() || self.operations.contains(&operation)
    }

    fn matches_list(candidates: &[String], value: &str) -> bool {
        candidates.is_empty()
            || candidates
                .iter()
                .any(|c| c == "*" || c.eq_ignore_ascii_case(value))
    }

    fn matches_resource(&self, plural: &str, subresource: Option<&str>) -> bool {
        if self.resources.is_empty() {
            return true;
        }
        self.resources.iter().any(|pattern| {
            if pattern == "*" {
                return true;
            }
            if let Some(base) = pattern.strip_suffix("/*") {
                return base.eq_ignore_ascii_case(plural) && subresource.is_some();
            }
            subresource.is_none() && pattern.eq_ignore_ascii_case(plural)
        })
    }

    #[must_use]
    pub fn matches(
        &self,
        operation: Operation,
        api_group: &str,
        api_version: &str,
        plural: &str,
        subresource: Option<&str>,
    ) -> bool {
        self.matches_operation(operation)
            && Self::matches_list(&self.api_groups, api_group)
            && Self::matches_list(&self.api_versions, api_version)
            && self.matches_resource(plural, subresource)
    }

    /// Like [`Self::matches`] but ignoring the operation dimension, for
    /// callers enumerating a GVR's live objects rather than reacting to a
    /// specific change (the folder reconciler's cluster-state listing).
    #[must_use]
    pub fn matches_gvr(&self, api_group: &str, api_version: &str, plural: &str) -> bool {
        Self::matches_list(&self.api_groups, api_group)
            && Self::matches_list(&self.api_versions, api_version)
            && self.matches_resource(plural, None)
    }
}

/// A label selector good enough for the rule store's purposes: exact-match
/// equality requirements, all of which must hold (`matchLabels` semantics).
/// An absent selector always matches; an invalid one (handled by the caller
/// at compile time) must never reach here — compilation should reject it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    pub match_labels: HashMap<String, String>,
}

impl LabelSelector {
    #[must_use]
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }
}

/// The in-memory, pre-validated form of a `WatchRule` or `ClusterWatchRule`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledRule {
    pub rule_ref: RuleRef,
    pub destination: DestinationRef,
    pub repo_namespace: String,
    pub repo_name: String,
    pub branch: String,
    pub base_folder: String,
    pub is_cluster_scoped: bool,
    /// Namespace the rule itself (not necessarily the destination) lives in
    /// and, for namespaced rules, the only namespace it is permitted to
    /// select objects from.
    pub rule_namespace: Option<String>,
    pub label_selector: Option<LabelSelector>,
    pub matchers: Vec<ResourceMatcher>,
}

/// Identifies the `WatchRule` or `ClusterWatchRule` a [`CompiledRule`] was
/// compiled from, for upsert/delete addressing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleRef {
    pub namespace: Option<String>,
    pub name: String,
}

#[derive(Default)]
struct Snapshot {
    rules: HashMap<RuleRef, CompiledRule>,
}

/// Compiled selection rule snapshot with a best-effort change signal for
/// the watch manager to resynchronize its informer set on.
pub struct RuleStore {
    snapshot: RwLock<Snapshot>,
    change_tx: watch::Sender<u64>,
}

impl RuleStore {
    #[must_use]
    pub fn new() -> Self {
        let (change_tx, _rx) = watch::channel(0);
        Self {
            snapshot: RwLock::new(Snapshot::default()),
            change_tx,
        }
    }

    /// Subscribes to the best-effort rule-change signal. The counter value
    /// itself carries no meaning beyond "something changed since the last
    /// value you observed".
    #[must_use]
    pub fn change_channel(&self) -> watch::Receiver<u64> {
        self.change_tx.subscribe()
    }

    pub fn upsert_rule(&self, rule: CompiledRule) {
        let mut snapshot = self.snapshot.write().expect("rule store lock poisoned");
        snapshot.rules.insert(rule.rule_ref.clone(), rule);
        drop(snapshot);
        self.signal_change();
    }

    pub fn delete_rule(&self, rule_ref: &RuleRef) {
        let mut snapshot = self.snapshot.write().expect("rule store lock poisoned");
        let existed = snapshot.rules.remove(rule_ref).is_some();
        drop(snapshot);
        if existed {
            self.signal_change();
        }
    }

    fn signal_change(&self) {
        self.change_tx.send_modify(|counter| *counter = counter.wrapping_add(1));
    }

    /// Returns every compiled rule whose selection criteria admit the given
    /// object coordinates. Scope is fixed by the rule's own kind, not by a
    /// field on the object: a cluster-scoped rule only ever compares against
    /// cluster-scoped objects and vice versa.
    #[must_use]
    pub fn matches(
        &self,
        plural: &str,
        subresource: Option<&str>,
        operation: Operation,
        api_group: &str,
        api_version: &str,
        is_cluster_scoped: bool,
        namespace: Option<&str>,
        labels: &HashMap<String, String>,
    ) -> Vec<CompiledRule> {
        let snapshot = self.snapshot.read().expect("rule store lock poisoned");
        snapshot
            .rules
            .values()
            .filter(|rule| rule.is_cluster_scoped == is_cluster_scoped)
            .filter(|rule| {
                is_cluster_scoped
                    || rule.rule_namespace.as_deref() == namespace
            })
            .filter(|rule| {
                rule.matchers
                    .iter()
                    .any(|m| m.matches(operation, api_group, api_version, plural, subresource))
            })
            .filter(|rule| {
                rule.label_selector
                    .as_ref()
                    .is_none_or(|sel| sel.matches(labels))
            })
            .cloned()
            .collect()
    }

    /// Every GVR (as `(group, version, resource)`) referenced by at least
    /// one active matcher across all rules, used by the watch manager's
    /// GVR computation.
    #[must_use]
    pub fn referenced_resource_plurals(&self) -> HashSet<String> {
        let snapshot = self.snapshot.read().expect("rule store lock poisoned");
        snapshot
            .rules
            .values()
            .flat_map(|rule| rule.matchers.iter())
            .flat_map(|matcher| matcher.resources.iter().cloned())
            .collect()
    }

    /// Every compiled rule currently targeting `destination`, used by the
    /// folder reconciler to work out which GVRs and label selectors its
    /// cluster-state listing needs to cover.
    #[must_use]
    pub fn rules_for_destination(&self, destination: &DestinationRef) -> Vec<CompiledRule> {
        self.snapshot
            .read()
            .expect("rule store lock poisoned")
            .rules
            .values()
            .filter(|rule| &rule.destination == destination)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<CompiledRule> {
        self.snapshot
            .read()
            .expect("rule store lock poisoned")
            .rules
            .values()
            .cloned()
            .collect()
    }
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rule(namespace: Option<&str>, cluster_scoped: bool) -> CompiledRule {
        CompiledRule {
            rule_ref: RuleRef {
                namespace: namespace.map(String::from),
                name: "rule-a".into(),
            },
            destination: DestinationRef::new("team-a", "dest-a"),
            repo_namespace: "team-a".into(),
            repo_name: "repo-a".into(),
            branch: "main".into(),
            base_folder: "clusters/dev".into(),
            is_cluster_scoped: cluster_scoped,
            rule_namespace: namespace.map(String::from),
            label_selector: None,
            matchers: vec![ResourceMatcher {
                operations: vec![],
                api_groups: vec![],
                api_versions: vec![],
                resources: vec!["configmaps".into()],
            }],
        }
    }

    #[test]
    fn empty_lists_match_everything() {
        let matcher = ResourceMatcher::default();
        assert!(matcher.matches(Operation::Create, "apps", "v1", "deployments", None));
    }

    #[test]
    fn wildcard_subresource_pattern_matches_only_subresources() {
        let matcher = ResourceMatcher {
            resources: vec!["pods/*".into()],
            ..Default::default()
        };
        assert!(matcher.matches(Operation::Update, "", "v1", "pods", Some("status")));
        assert!(!matcher.matches(Operation::Update, "", "v1", "pods", None));
    }

    #[test]
    fn namespaced_rule_only_matches_its_own_namespace() {
        let store = RuleStore::new();
        store.upsert_rule(sample_rule(Some("app-a"), false));
        let labels = HashMap::new();
        let matches_own_ns = store.matches(
            "configmaps",
            None,
            Operation::Create,
            "",
            "v1",
            false,
            Some("app-a"),
            &labels,
        );
        assert_eq!(matches_own_ns.len(), 1);

        let matches_other_ns = store.matches(
            "configmaps",
            None,
            Operation::Create,
            "",
            "v1",
            false,
            Some("app-b"),
            &labels,
        );
        assert!(matches_other_ns.is_empty());
    }

    #[test]
    fn cluster_scoped_rule_never_matches_namespaced_objects() {
        let store = RuleStore::new();
        store.upsert_rule(sample_rule(None, true));
        let labels = HashMap::new();
        let matches = store.matches(
            "configmaps",
            None,
            Operation::Create,
            "",
            "v1",
            false,
            Some("app-a"),
            &labels,
        );
        assert!(matches.is_empty());
    }

    #[test]
    fn invalid_label_selector_excludes_for_safety() {
        // A selector that can never be satisfied behaves the same as an
        // invalid one: it excludes rather than falling back to "match all".
        let mut rule = sample_rule(Some("app-a"), false);
        let mut match_labels = HashMap::new();
        match_labels.insert("env".to_string(), "impossible-value".to_string());
        rule.label_selector = Some(LabelSelector { match_labels });
        let store = RuleStore::new();
        store.upsert_rule(rule);
        let mut labels = HashMap::new();
        labels.insert("env".to_string(), "prod".to_string());
        let matches = store.matches(
            "configmaps",
            None,
            Operation::Create,
            "",
            "v1",
            false,
            Some("app-a"),
            &labels,
        );
        assert!(matches.is_empty());
    }

    #[test]
    fn upsert_and_delete_emit_change_signals() {
        let store = RuleStore::new();
        let mut rx = store.change_channel();
        let initial = *rx.borrow();
        store.upsert_rule(sample_rule(Some("app-a"), false));
        assert!(rx.has_changed().unwrap());
        let after_upsert = *rx.borrow_and_update();
        assert_ne!(initial, after_upsert);

        store.delete_rule(&RuleRef {
            namespace: Some("app-a".into()),
            name: "rule-a".into(),
        });
        assert!(rx.has_changed().unwrap());
    }
}
