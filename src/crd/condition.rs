//! Shared status condition type, used by every kind's status.

use serde::{Deserialize, Serialize};

/// A single status condition, following the Kubernetes conventions
/// (`type`/`status`/`lastTransitionTime`/`reason`/`message`).
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: String,
    #[serde(default)]
    pub last_transition_time: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    #[must_use]
    pub fn new(r#type: impl Into<String>, status: impl Into<String>, reason: impl Into<String>, message: impl Into<String>, now: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            r#type: r#type.into(),
            status: status.into(),
            last_transition_time: Some(now.to_rfc3339()),
            reason: Some(reason.into()),
            message: Some(message.into()),
        }
    }

    #[must_use]
    pub fn true_condition(r#type: impl Into<String>, reason: impl Into<String>, message: impl Into<String>, now: chrono::DateTime<chrono::Utc>) -> Self {
        Self::new(r#type, "True", reason, message, now)
    }

    #[must_use]
    pub fn false_condition(r#type: impl Into<String>, reason: impl Into<String>, message: impl Into<String>, now: chrono::DateTime<chrono::Utc>) -> Self {
        Self::new(r#type, "False", reason, message, now)
    }
}

/// Merges `new` into `conditions` by `type`, replacing an existing entry of
/// the same type in place (preserving its position) or appending. Used by
/// every controller's status-patch step so conditions don't reorder on
/// every reconcile and generate spurious diffs.
pub fn upsert_condition(conditions: &mut Vec<Condition>, new: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == new.r#type) {
        *existing = new;
    } else {
        conditions.push(new);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn upsert_replaces_same_type_in_place() {
        let mut conditions = vec![
            Condition::true_condition("Ready", "Reconciled", "ok", Utc::now()),
            Condition::true_condition("Available", "Reachable", "ok", Utc::now()),
        ];
        upsert_condition(&mut conditions, Condition::false_condition("Ready", "Broken", "bad", Utc::now()));
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].r#type, "Ready");
        assert_eq!(conditions[0].status, "False");
    }

    #[test]
    fn upsert_appends_new_type() {
        let mut conditions = vec![Condition::true_condition("Ready", "Reconciled", "ok", Utc::now())];
        upsert_condition(&mut conditions, Condition::true_condition("Synced", "UpToDate", "ok", Utc::now()));
        assert_eq!(conditions.len(), 2);
    }
}
