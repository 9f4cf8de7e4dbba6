//! # ConfigButler
//!
//! A Kubernetes controller that mirrors live cluster objects into Git as
//! canonical, attributed YAML. Operators declare, via custom resources,
//! which Git destinations exist (`GitRepoConfig`, `GitDestination`) and
//! which resources should be mirrored to each (`WatchRule`,
//! `ClusterWatchRule`). The cluster is always the source of truth; this
//! crate only ever reads from it and writes to Git.
//!
//! Every CRD type lives in [`crd`] and is re-exported from there alone —
//! the binary, the CLI, and `crdgen` all import the same definitions rather
//! than redeclaring them.

pub mod admission;
pub mod backoff;
pub mod config;
pub mod constants;
pub mod controllers;
pub mod correlation;
pub mod crd;
pub mod errors;
pub mod fingerprint;
pub mod model;
pub mod observability;
pub mod reconciler;
pub mod router;
pub mod rules;
pub mod sanitize;
pub mod server;
pub mod stream;
pub mod watch;
pub mod worker;
