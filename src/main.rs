//! ConfigButler controller binary: wires up the watch manager, event
//! router, admission webhook, metrics/health server, and the four CRD
//! controllers, then runs until shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use kube::Client;
use tracing::{error, info};

use configbutler::admission::{self, AdmissionState};
use configbutler::config::Config;
use configbutler::controllers::{self, ControllerContext};
use configbutler::correlation::CorrelationStore;
use configbutler::observability::metrics;
use configbutler::router::EventRouter;
use configbutler::rules::RuleStore;
use configbutler::server::{start_server, ServerState};
use configbutler::watch::WatchManager;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "configbutler=info".into()),
        )
        .init();

    info!("starting configbutler");

    metrics::register_metrics()?;
    let config = Arc::new(Config::from_env());

    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(AtomicBool::new(false)),
    });
    let metrics_server_state = Arc::clone(&server_state);
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(err) = start_server(metrics_port, metrics_server_state).await {
            error!(%err, "metrics/health HTTP server error");
        }
    });

    let client = Client::try_default().await.context("failed to build Kubernetes client")?;

    let rule_store = Arc::new(RuleStore::new());
    let correlation_store = Arc::new(CorrelationStore::new(config.correlation_ttl, config.correlation_max_keys));
    let router = Arc::new(EventRouter::new());
    let watch_manager = Arc::new(WatchManager::new(
        client.clone(),
        Arc::clone(&rule_store),
        Arc::clone(&correlation_store),
        Arc::clone(&router),
    ));

    let watch_manager_task = Arc::clone(&watch_manager);
    tokio::spawn(async move { watch_manager_task.run().await });

    let correlation_sweep_store = Arc::clone(&correlation_store);
    tokio::spawn(async move { correlation_sweep_loop(correlation_sweep_store).await });

    if let (Some(cert_path), Some(key_path)) = (&config.webhook_tls_cert_path, &config.webhook_tls_key_path) {
        let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
            .await
            .context("failed to load webhook TLS certificate/key")?;
        let webhook_app = admission::router(AdmissionState {
            correlation_store: Arc::clone(&correlation_store),
        });
        let webhook_addr = format!("0.0.0.0:{}", config.webhook_port).parse().context("invalid webhook bind address")?;
        tokio::spawn(async move {
            if let Err(err) = axum_server::bind_rustls(webhook_addr, tls_config)
                .serve(webhook_app.into_make_service())
                .await
            {
                error!(%err, "admission webhook HTTPS server error");
            }
        });
    } else {
        info!("webhook TLS cert/key not configured, admission webhook disabled");
    }

    let ctx = Arc::new(ControllerContext::new(
        client.clone(),
        Arc::clone(&config),
        Arc::clone(&rule_store),
        Arc::clone(&watch_manager),
        Arc::clone(&router),
        Arc::clone(&correlation_store),
    ));

    let handles = vec![
        controllers::git_repo_config::spawn(client.clone(), Arc::clone(&ctx)),
        controllers::git_destination::spawn(client.clone(), Arc::clone(&ctx)),
        controllers::watch_rule::spawn(client.clone(), Arc::clone(&ctx)),
        controllers::cluster_watch_rule::spawn(client.clone(), Arc::clone(&ctx)),
    ];

    server_state.is_ready.store(true, Ordering::Relaxed);
    info!("all controllers started, marked ready");

    for handle in handles {
        if let Err(err) = handle.await {
            error!(%err, "controller task panicked");
        }
    }

    info!("controller stopped");
    Ok(())
}

/// Periodically sweeps expired correlation entries and mirrors the store's
/// own eviction counters into Prometheus. Runs independently of any
/// lookup, so a key that is never looked up again after expiring still
/// gets counted and freed rather than sitting until the LRU bound forces
/// it out.
async fn correlation_sweep_loop(store: Arc<CorrelationStore>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
    let mut last_ttl_evictions = 0u64;
    let mut last_lru_evictions = 0u64;
    loop {
        interval.tick().await;
        store.purge_expired();
        let stats = store.stats();
        if stats.ttl_evictions > last_ttl_evictions {
            metrics::increment_correlation_ttl_evictions_by(stats.ttl_evictions - last_ttl_evictions);
            last_ttl_evictions = stats.ttl_evictions;
        }
        if stats.lru_evictions > last_lru_evictions {
            metrics::increment_correlation_lru_evictions_by(stats.lru_evictions - last_lru_evictions);
            last_lru_evictions = stats.lru_evictions;
        }
    }
}
