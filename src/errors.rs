//! # Error taxonomy
//!
//! Internal propagation inside a component uses `anyhow::Result` throughout,
//! the same as the rest of this codebase. At the boundary each of the four
//! CRD controllers reconciles against, errors are narrowed into
//! [`ReconcilerError`] so the controller-runtime error-policy closure can
//! pick a requeue delay and a condition reason without string-sniffing.

use thiserror::Error;

/// Error taxonomy surfaced by controller reconcile loops.
///
/// Each variant maps onto one row of the error-handling design: user-fixable
/// configuration problems never enter the data path, transient remote
/// problems keep retrying with backoff, and fatal problems tear the worker
/// down and let the controller recreate it on the next pass.
#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// User-fixable: bad reference, disallowed branch, conflicting stream
    /// key, invalid selector. Surfaces as `Ready=False` and never reaches
    /// the data path.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Two destinations registered against the same stream key. Kept
    /// distinct from `Configuration` so it surfaces its own stable reason
    /// rather than the generic `InvalidConfiguration`.
    #[error("stream key conflict: {0}")]
    Conflict(String),

    /// Git auth failures, DNS/connection timeouts, push rejections.
    /// Surfaces as `Available=False` or `Synced=False` with `reason`.
    #[error("transient remote error ({reason}): {source}")]
    TransientRemote {
        reason: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// Sanitization or encryption failure for a specific object.
    #[error("data error: {0}")]
    Data(String),

    /// Corrupt clone, unwritable working directory. The worker terminates
    /// and the controller attempts to recreate it on next reconcile.
    #[error("fatal error: {0}")]
    Fatal(#[source] anyhow::Error),
}

impl ReconcilerError {
    /// Condition reason surfaced on the owning custom resource. PascalCase
    /// and stable per the error-handling design's requirement that reasons
    /// never collapse to a single generic "Error".
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "InvalidConfiguration",
            Self::Conflict(_) => "Conflict",
            Self::TransientRemote { reason, .. } => reason,
            Self::Data(_) => "DataError",
            Self::Fatal(_) => "Fatal",
        }
    }

    pub fn authentication_failed(source: anyhow::Error) -> Self {
        Self::TransientRemote {
            reason: "AuthenticationFailed",
            source,
        }
    }

    pub fn network_error(source: anyhow::Error) -> Self {
        Self::TransientRemote {
            reason: "NetworkError",
            source,
        }
    }

    pub fn git_operation_failed(source: anyhow::Error) -> Self {
        Self::TransientRemote {
            reason: "GitOperationFailed",
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_report_invalid_configuration_reason() {
        let err = ReconcilerError::Configuration("branch not allowed".into());
        assert_eq!(err.reason(), "InvalidConfiguration");
    }

    #[test]
    fn transient_remote_helpers_set_expected_reason() {
        let err = ReconcilerError::network_error(anyhow::anyhow!("dns timeout"));
        assert_eq!(err.reason(), "NetworkError");
    }

    #[test]
    fn fatal_errors_report_fatal_reason() {
        let err = ReconcilerError::Fatal(anyhow::anyhow!("corrupt clone"));
        assert_eq!(err.reason(), "Fatal");
    }

    #[test]
    fn conflict_errors_report_conflict_reason() {
        let err = ReconcilerError::Conflict("stream key already claimed".into());
        assert_eq!(err.reason(), "Conflict");
    }
}
