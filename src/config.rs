//! # Runtime configuration
//!
//! Every knob is read once at startup from the environment, following
//! `main.rs`'s own inline `std::env::var` convention, just centralized here
//! since this controller reads many more of them than the teacher's single
//! `METRICS_PORT` lookup.

use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BOT_AUTHOR_EMAIL, DEFAULT_BOT_AUTHOR_NAME, DEFAULT_CONTROLLER_REQUEUE_SECS,
    DEFAULT_CORRELATION_MAX_KEYS, DEFAULT_CORRELATION_TTL_SECS, DEFAULT_METRICS_PORT,
    DEFAULT_WEBHOOK_PORT,
};

/// Process-wide configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub metrics_port: u16,
    pub webhook_port: u16,
    pub webhook_tls_cert_path: Option<PathBuf>,
    pub webhook_tls_key_path: Option<PathBuf>,
    pub git_clone_cache_root: PathBuf,
    pub encryption_scratch_root: PathBuf,
    pub bot_author_name: String,
    pub bot_author_email: String,
    pub encryption_tool_path: Option<PathBuf>,
    pub correlation_ttl: Duration,
    pub correlation_max_keys: usize,
    pub reconcile_requeue: Duration,
}

impl Config {
    /// Reads configuration from the environment, falling back to the
    /// defaults in [`crate::constants`] for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            metrics_port: env_parsed("METRICS_PORT", DEFAULT_METRICS_PORT),
            webhook_port: env_parsed("WEBHOOK_PORT", DEFAULT_WEBHOOK_PORT),
            webhook_tls_cert_path: std::env::var("WEBHOOK_TLS_CERT_PATH").ok().map(PathBuf::from),
            webhook_tls_key_path: std::env::var("WEBHOOK_TLS_KEY_PATH").ok().map(PathBuf::from),
            git_clone_cache_root: std::env::var("GIT_CLONE_CACHE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir().join("configbutler-clones")),
            // Deliberately a sibling of, not nested under, `git_clone_cache_root`:
            // encryption scratch files must never land inside a worker's
            // working tree, where a stray `.in` plaintext file could be
            // swept up by `index.add_all` and committed.
            encryption_scratch_root: std::env::var("ENCRYPTION_SCRATCH_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir().join("configbutler-encrypt-scratch")),
            bot_author_name: std::env::var("BOT_AUTHOR_NAME").unwrap_or_else(|_| DEFAULT_BOT_AUTHOR_NAME.to_string()),
            bot_author_email: std::env::var("BOT_AUTHOR_EMAIL")
                .unwrap_or_else(|_| DEFAULT_BOT_AUTHOR_EMAIL.to_string()),
            encryption_tool_path: std::env::var("ENCRYPTION_TOOL_PATH").ok().map(PathBuf::from),
            correlation_ttl: Duration::from_secs(env_parsed("CORRELATION_TTL_SECS", DEFAULT_CORRELATION_TTL_SECS)),
            correlation_max_keys: env_parsed("CORRELATION_MAX_KEYS", DEFAULT_CORRELATION_MAX_KEYS as u64) as usize,
            reconcile_requeue: Duration::from_secs(env_parsed(
                "RECONCILE_REQUEUE_SECS",
                DEFAULT_CONTROLLER_REQUEUE_SECS,
            )),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_parsed_falls_back_to_default_when_unset_or_invalid() {
        std::env::remove_var("CONFIGBUTLER_TEST_UNSET_KEY");
        assert_eq!(env_parsed::<u16>("CONFIGBUTLER_TEST_UNSET_KEY", 42), 42);
    }
}
