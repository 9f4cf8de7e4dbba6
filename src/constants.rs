//! # Constants
//!
//! Shared defaults used throughout the controller. Values here represent
//! reasonable defaults and are overridable via environment variables where
//! a corresponding `config.rs` lookup exists.

/// Default HTTP server port for metrics and health probes.
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTPS port for the admission webhook.
pub const DEFAULT_WEBHOOK_PORT: u16 = 8443;

/// Default HTTP server startup timeout.
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default periodic requeue interval for the four CRD controllers (seconds).
pub const DEFAULT_CONTROLLER_REQUEUE_SECS: u64 = 600;

/// Default exponential/Fibonacci backoff starting value (seconds).
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 1;

/// Default backoff ceiling (seconds).
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Correlation store entry time-to-live (seconds).
pub const DEFAULT_CORRELATION_TTL_SECS: u64 = 60;

/// Correlation store global bound on live keys (LRU eviction above this).
pub const DEFAULT_CORRELATION_MAX_KEYS: usize = 10_000;

/// Identity used to attribute watch events with no correlated admission.
pub const SYSTEM_ACTOR_IDENTITY: &str = "system:watch-manager";

/// Periodic GVR discovery refresh interval for the watch manager (seconds).
pub const DEFAULT_DISCOVERY_REFRESH_SECS: u64 = 300;

/// Debounce window for coalescing bursts of rule-store change signals (seconds).
pub const DEFAULT_RULE_CHANGE_DEBOUNCE_SECS: u64 = 2;

/// Default timeout for a folder reconciler awaiting cluster/repo state (seconds).
pub const DEFAULT_STATE_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Destination stream bounded capacity (events).
pub const DEFAULT_STREAM_CAPACITY: usize = 100;

/// Destination stream per-identifier dedup window size.
pub const DEFAULT_STREAM_DEDUP_WINDOW: usize = 64;

/// Branch worker flush trigger: event count.
pub const DEFAULT_FLUSH_MAX_EVENTS: usize = 200;

/// Branch worker flush trigger: accumulated byte size.
pub const DEFAULT_FLUSH_MAX_BYTES: usize = 1024 * 1024;

/// Branch worker flush trigger: wall-clock age of the oldest buffered event (seconds).
pub const DEFAULT_FLUSH_MAX_AGE_SECS: u64 = 20;

/// Branch worker bounded push-retry count on non-fast-forward rejection.
pub const DEFAULT_PUSH_RETRY_LIMIT: u32 = 5;

/// `syncAndGetMetadata` result cache lifetime (seconds); concurrent callers
/// within the window share one underlying fetch.
pub const DEFAULT_PULL_REPORT_CACHE_SECS: u64 = 30;

/// Default bot identity used for commit authorship.
pub const DEFAULT_BOT_AUTHOR_NAME: &str = "configbutler-bot";
pub const DEFAULT_BOT_AUTHOR_EMAIL: &str = "bot@configbutler.ai";

/// Default GVRs carrying the encryption allow-list; objects at these
/// coordinates are piped through the external envelope tool before being
/// written into the working tree.
pub const DEFAULT_ENCRYPTION_ALLOWLIST: &[(&str, &str, &str)] = &[("", "v1", "secrets")];

/// Resource kinds excluded from informer creation regardless of rule
/// selection: noisy, structural, or not meaningfully mirrorable.
pub const DEFAULT_GVR_EXCLUSIONS: &[(&str, &str, &str)] = &[
    ("", "v1", "pods"),
    ("", "v1", "events"),
    ("events.k8s.io", "v1", "events"),
    ("", "v1", "endpoints"),
    ("discovery.k8s.io", "v1", "endpointslices"),
    ("coordination.k8s.io", "v1", "leases"),
    ("apps", "v1", "controllerrevisions"),
    ("flowcontrol.apiserver.k8s.io", "v1beta3", "flowschemas"),
    ("flowcontrol.apiserver.k8s.io", "v1beta3", "prioritylevelconfigurations"),
    ("batch", "v1", "jobs"),
    ("batch", "v1", "cronjobs"),
];

/// Path segment substituted for the empty (core) API group on disk.
pub const CORE_GROUP_PATH_SEGMENT: &str = "_core";

/// The group all custom resources in this system belong to.
pub const CRD_GROUP: &str = "configbutler.ai";

/// The version all custom resources in this system currently expose.
pub const CRD_VERSION: &str = "v1alpha1";
