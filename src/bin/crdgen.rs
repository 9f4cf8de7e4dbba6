//! Generates CustomResourceDefinition YAML for all four ConfigButler kinds
//! from the canonical type definitions in [`configbutler::crd`].
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/bases/all.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::core::CustomResourceExt;

use configbutler::crd::{ClusterWatchRule, GitDestination, GitRepoConfig, WatchRule};

fn main() {
    let crds = [
        serde_yaml::to_string(&GitRepoConfig::crd()),
        serde_yaml::to_string(&GitDestination::crd()),
        serde_yaml::to_string(&WatchRule::crd()),
        serde_yaml::to_string(&ClusterWatchRule::crd()),
    ];

    for (index, crd) in crds.into_iter().enumerate() {
        match crd {
            Ok(yaml) => {
                if index > 0 {
                    println!("---");
                }
                print!("{yaml}");
            }
            Err(err) => {
                eprintln!("failed to serialize CRD to YAML: {err}");
                std::process::exit(1);
            }
        }
    }
}
