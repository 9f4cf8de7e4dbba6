//! # butlerctl
//!
//! Command-line companion to the ConfigButler controller. Triggers a
//! reconciliation by patching a timestamp annotation the corresponding
//! controller's informer picks up as a change, and prints `list`/`status`
//! views for any of the four CRD kinds.
//!
//! ```bash
//! butlerctl reconcile --kind git-destination --namespace team-a --name prod-cluster
//! butlerctl list --kind watch-rule
//! butlerctl status --kind git-repo-config --namespace team-a --name origin
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::Client;
use serde_json::json;

use configbutler::crd::{ClusterWatchRule, GitDestination, GitRepoConfig, WatchRule};

const ANNOTATION: &str = "configbutler.ai/reconcile";

#[derive(Parser)]
#[command(name = "butlerctl")]
#[command(about = "ConfigButler controller CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Kubernetes namespace (defaults to `default`)
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Kubernetes context to use
    #[arg(short, long, global = true)]
    context: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    GitRepoConfig,
    GitDestination,
    WatchRule,
    ClusterWatchRule,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger reconciliation by patching the reconcile annotation
    Reconcile {
        #[arg(short, long, value_enum)]
        kind: Kind,
        #[arg(short, long)]
        name: String,
        #[arg(short = 'N', long)]
        namespace: Option<String>,
    },
    /// List resources of a kind
    List {
        #[arg(short, long, value_enum)]
        kind: Kind,
        #[arg(short, long)]
        namespace: Option<String>,
    },
    /// Show status of a single resource
    Status {
        #[arg(short, long, value_enum)]
        kind: Kind,
        #[arg(short, long)]
        name: String,
        #[arg(short = 'N', long)]
        namespace: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "butlerctl=info".into()))
        .init();

    let cli = Cli::parse();
    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client, check your kubeconfig")?;

    match cli.command {
        Commands::Reconcile { kind, name, namespace } => {
            reconcile_command(client, kind, name, namespace.or(cli.namespace)).await
        }
        Commands::List { kind, namespace } => list_command(client, kind, namespace.or(cli.namespace)).await,
        Commands::Status { kind, name, namespace } => {
            status_command(client, kind, name, namespace.or(cli.namespace)).await
        }
    }
}

async fn reconcile_command(client: Client, kind: Kind, name: String, namespace: Option<String>) -> Result<()> {
    let ns = namespace.as_deref().unwrap_or("default");
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs().to_string();
    let patch = json!({ "metadata": { "annotations": { ANNOTATION: timestamp } } });
    let patch_params = PatchParams::apply("butlerctl").force();

    match kind {
        Kind::GitRepoConfig => {
            let api: Api<GitRepoConfig> = Api::namespaced(client, ns);
            api.patch(&name, &patch_params, &Patch::Merge(patch)).await
        }
        Kind::GitDestination => {
            let api: Api<GitDestination> = Api::namespaced(client, ns);
            api.patch(&name, &patch_params, &Patch::Merge(patch)).await
        }
        Kind::WatchRule => {
            let api: Api<WatchRule> = Api::namespaced(client, ns);
            api.patch(&name, &patch_params, &Patch::Merge(patch)).await
        }
        Kind::ClusterWatchRule => {
            let api: Api<ClusterWatchRule> = Api::all(client);
            api.patch(&name, &patch_params, &Patch::Merge(patch)).await
        }
    }
    .with_context(|| format!("failed to trigger reconciliation for '{ns}/{name}'"))?;

    println!("reconciliation triggered for {ns}/{name}");
    Ok(())
}

async fn list_command(client: Client, kind: Kind, namespace: Option<String>) -> Result<()> {
    match kind {
        Kind::GitRepoConfig => print_list(list_namespaced::<GitRepoConfig>(client, namespace).await?, |c| {
            (c.metadata.name.clone(), c.metadata.namespace.clone(), ready_status(&c.status.as_ref().map(|s| s.conditions.clone())))
        }),
        Kind::GitDestination => print_list(list_namespaced::<GitDestination>(client, namespace).await?, |c| {
            (c.metadata.name.clone(), c.metadata.namespace.clone(), ready_status(&c.status.as_ref().map(|s| s.conditions.clone())))
        }),
        Kind::WatchRule => print_list(list_namespaced::<WatchRule>(client, namespace).await?, |c| {
            (c.metadata.name.clone(), c.metadata.namespace.clone(), ready_status(&c.status.as_ref().map(|s| s.conditions.clone())))
        }),
        Kind::ClusterWatchRule => {
            let api: Api<ClusterWatchRule> = Api::all(client);
            let list = api.list(&ListParams::default()).await.context("failed to list ClusterWatchRules")?;
            print_list(list.items, |c| {
                (c.metadata.name.clone(), c.metadata.namespace.clone(), ready_status(&c.status.as_ref().map(|s| s.conditions.clone())))
            })
        }
    }
    Ok(())
}

async fn list_namespaced<K>(client: Client, namespace: Option<String>) -> Result<Vec<K>>
where
    K: kube::Resource<Scope = kube::core::NamespaceResourceScope> + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    K::DynamicType: Default,
{
    let api: Api<K> = match namespace {
        Some(ns) => Api::namespaced(client, &ns),
        None => Api::all(client),
    };
    let list = api.list(&ListParams::default()).await.context("failed to list resources")?;
    Ok(list.items)
}

fn ready_status(conditions: &Option<Vec<configbutler::crd::Condition>>) -> &'static str {
    conditions
        .as_ref()
        .and_then(|cs| cs.iter().find(|c| c.r#type == "Ready"))
        .map(|c| if c.status == "True" { "True" } else { "False" })
        .unwrap_or("Unknown")
}

fn print_list<T>(items: Vec<T>, row: impl Fn(&T) -> (Option<String>, Option<String>, &'static str)) {
    if items.is_empty() {
        println!("No resources found.");
        return;
    }
    println!("{:<30} {:<20} {:<10}", "NAME", "NAMESPACE", "READY");
    println!("{}", "-".repeat(62));
    for item in &items {
        let (name, namespace, ready) = row(item);
        println!(
            "{:<30} {:<20} {:<10}",
            name.as_deref().unwrap_or("<unknown>"),
            namespace.as_deref().unwrap_or("<cluster>"),
            ready
        );
    }
}

async fn status_command(client: Client, kind: Kind, name: String, namespace: Option<String>) -> Result<()> {
    let ns = namespace.as_deref().unwrap_or("default");
    match kind {
        Kind::GitRepoConfig => {
            let api: Api<GitRepoConfig> = Api::namespaced(client, ns);
            let config = api.get(&name).await.with_context(|| format!("failed to get GitRepoConfig '{ns}/{name}'"))?;
            println!("GitRepoConfig {ns}/{name}");
            println!("  repoUrl: {}", config.spec.repo_url);
            println!("  defaultBranch: {}", config.spec.default_branch);
            print_conditions(config.status.as_ref().map(|s| s.conditions.as_slice()));
        }
        Kind::GitDestination => {
            let api: Api<GitDestination> = Api::namespaced(client, ns);
            let dest = api.get(&name).await.with_context(|| format!("failed to get GitDestination '{ns}/{name}'"))?;
            println!("GitDestination {ns}/{name}");
            println!("  repoRef: {}/{}", dest.spec.repo_ref.namespace, dest.spec.repo_ref.name);
            println!("  branch: {}", dest.spec.branch);
            println!("  baseFolder: {}", dest.spec.base_folder);
            print_conditions(dest.status.as_ref().map(|s| s.conditions.as_slice()));
        }
        Kind::WatchRule => {
            let api: Api<WatchRule> = Api::namespaced(client, ns);
            let rule = api.get(&name).await.with_context(|| format!("failed to get WatchRule '{ns}/{name}'"))?;
            println!("WatchRule {ns}/{name}");
            println!("  destinationRef: {}", rule.spec.destination_ref.name);
            print_conditions(rule.status.as_ref().map(|s| s.conditions.as_slice()));
        }
        Kind::ClusterWatchRule => {
            let api: Api<ClusterWatchRule> = Api::all(client);
            let rule = api.get(&name).await.with_context(|| format!("failed to get ClusterWatchRule '{name}'"))?;
            println!("ClusterWatchRule {name}");
            println!(
                "  destinationRef: {}/{}",
                rule.spec.destination_ref.namespace, rule.spec.destination_ref.name
            );
            print_conditions(rule.status.as_ref().map(|s| s.conditions.as_slice()));
        }
    }
    Ok(())
}

fn print_conditions(conditions: Option<&[configbutler::crd::Condition]>) {
    let Some(conditions) = conditions else {
        println!("  status: not yet reconciled");
        return;
    };
    if conditions.is_empty() {
        println!("  status: not yet reconciled");
        return;
    }
    println!("  conditions:");
    for condition in conditions {
        println!("    {}: {}", condition.r#type, condition.status);
        if let Some(reason) = &condition.reason {
            println!("      reason: {reason}");
        }
        if let Some(message) = &condition.message {
            println!("      message: {message}");
        }
    }
}
