//! Resource identifiers and their canonical on-disk path form.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::CORE_GROUP_PATH_SEGMENT;

/// Uniquely identifies a Kubernetes object: `{group, version, resource,
/// namespace, name}` with an optional subresource.
///
/// Namespaced objects render to `group/version/namespace/resource/name.yaml`;
/// cluster-scoped objects render to `group/version/resource/name.yaml`. The
/// empty (core) API group is replaced by the literal segment `_core` so the
/// filesystem tree never contains an empty path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    pub group: String,
    pub version: String,
    pub resource: String,
    pub namespace: Option<String>,
    pub name: String,
    pub subresource: Option<String>,
}

impl ResourceIdentifier {
    #[must_use]
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
        namespace: Option<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
            namespace,
            name: name.into(),
            subresource: None,
        }
    }

    #[must_use]
    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_none()
    }

    fn group_segment(&self) -> &str {
        if self.group.is_empty() {
            CORE_GROUP_PATH_SEGMENT
        } else {
            &self.group
        }
    }

    /// Canonical path of this object relative to a destination's base
    /// folder, e.g. `_core/v1/app-a/configmaps/settings.yaml` or
    /// `rbac.authorization.k8s.io/v1/clusterroles/admin.yaml`.
    #[must_use]
    pub fn canonical_path(&self) -> String {
        match &self.namespace {
            Some(ns) => format!(
                "{}/{}/{}/{}/{}.yaml",
                self.group_segment(),
                self.version,
                ns,
                self.resource,
                self.name
            ),
            None => format!(
                "{}/{}/{}/{}.yaml",
                self.group_segment(),
                self.version,
                self.resource,
                self.name
            ),
        }
    }

    /// Inverse of [`Self::canonical_path`]: parses an on-disk path back into
    /// an identifier, used by the branch worker's working-tree scan.
    #[must_use]
    pub fn from_canonical_path(path: &str) -> Option<Self> {
        let trimmed = path.strip_suffix(".yaml")?;
        let parts: Vec<&str> = trimmed.split('/').collect();
        match parts.as_slice() {
            [group, version, resource, name] => {
                let group = if *group == CORE_GROUP_PATH_SEGMENT {
                    String::new()
                } else {
                    (*group).to_string()
                };
                Some(Self::new(group, *version, *resource, None, *name))
            }
            [group, version, namespace, resource, name] => {
                let group = if *group == CORE_GROUP_PATH_SEGMENT {
                    String::new()
                } else {
                    (*group).to_string()
                };
                Some(Self::new(
                    group,
                    *version,
                    *resource,
                    Some((*namespace).to_string()),
                    *name,
                ))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(
                f,
                "{}/{}/{}/{}/{}",
                self.group, self.version, self.resource, ns, self.name
            ),
            None => write!(
                f,
                "{}/{}/{}/{}",
                self.group, self.version, self.resource, self.name
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaced_path_uses_core_segment_for_empty_group() {
        let id = ResourceIdentifier::new(
            "",
            "v1",
            "configmaps",
            Some("app-a".to_string()),
            "settings",
        );
        assert_eq!(
            id.canonical_path(),
            "_core/v1/app-a/configmaps/settings.yaml"
        );
    }

    #[test]
    fn cluster_scoped_path_has_no_namespace_segment() {
        let id = ResourceIdentifier::new(
            "rbac.authorization.k8s.io",
            "v1",
            "clusterroles",
            None,
            "admin",
        );
        assert_eq!(
            id.canonical_path(),
            "rbac.authorization.k8s.io/v1/clusterroles/admin.yaml"
        );
        assert!(id.is_cluster_scoped());
    }

    #[test]
    fn canonical_path_round_trips_through_parsing() {
        let id = ResourceIdentifier::new(
            "apps",
            "v1",
            "deployments",
            Some("app-a".to_string()),
            "api",
        );
        let parsed = ResourceIdentifier::from_canonical_path(&id.canonical_path()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parsing_rejects_malformed_paths() {
        assert!(ResourceIdentifier::from_canonical_path("not-a-valid-path").is_none());
    }
}
