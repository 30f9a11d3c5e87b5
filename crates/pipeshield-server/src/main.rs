//! pipeshield entrypoint.
//!
//! Wires config, the Prometheus client, the decision store, the reconciler
//! (optionally gated by leader election), and the admission/probe listeners.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use pipeshield_core::Config;
use pipeshield_metrics::PrometheusClient;
use pipeshield_server::leader::LeaderGate;
use pipeshield_server::reconciler::{Reconciler, Strategy};
use pipeshield_server::webhook::{self, AppState};
use pipeshield_store::{ConfigMapStore, DecisionStore, MemoryStore};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LEASE_NAME: &str = "pipeshield-reconciler";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreBackend {
    /// Shared ConfigMap in the cluster (the normal deployment).
    Configmap,
    /// Process-local store, for development runs without a cluster.
    Memory,
}

#[derive(Debug, Parser)]
#[command(name = "pipeshield", about = "Admission gate protecting etcd from pipeline-run floods")]
struct Args {
    /// Location of the pipeshield config file.
    #[arg(long, default_value = "/etc/pipeshield/config.yaml")]
    config: PathBuf,

    /// Port to listen for admission reviews on.
    #[arg(long, default_value_t = 9443)]
    port: u16,

    /// Port the health probe endpoints bind to.
    #[arg(long, default_value_t = 8081)]
    probe_port: u16,

    /// Run the reconciler only while holding the leadership lease.
    #[arg(long)]
    leader_elect: bool,

    /// Decision store backend.
    #[arg(long, value_enum, default_value_t = StoreBackend::Configmap)]
    store: StoreBackend,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "pipeshield=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
    tracing::info!("shutdown signal received");
    cancel.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = Config::load(&args.config).context("failed to load configuration")?;
    let strategy_spec = config.strategy().context("invalid strategy configuration")?;
    tracing::info!(config = %args.config.display(), strategy = ?strategy_spec, "configuration loaded");

    let prometheus = Arc::new(
        PrometheusClient::new(&config.prometheus.address, &config.prometheus.config)
            .context("failed to build prometheus client")?,
    );

    let kube_client = if args.store == StoreBackend::Configmap || args.leader_elect {
        Some(
            kube::Client::try_default()
                .await
                .context("failed to build kubernetes client")?,
        )
    } else {
        None
    };

    let store: Arc<dyn DecisionStore> = match args.store {
        StoreBackend::Configmap => Arc::new(ConfigMapStore::new(
            kube_client.clone().expect("kube client built above"),
            &config.dest_namespace,
            &config.dest_name,
        )),
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    };

    let strategy = Strategy::from_spec(strategy_spec, prometheus);
    let reconciler = Reconciler::new(store.clone(), strategy, config.wait_time.as_std());

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let reconciler_task = if args.leader_elect {
        let identity = hostname::get()
            .context("failed to determine hostname")?
            .to_string_lossy()
            .into_owned();
        let gate = LeaderGate::new(
            kube_client.expect("kube client built above"),
            &config.dest_namespace,
            LEASE_NAME,
            identity,
        );
        let cancel = cancel.clone();
        tokio::spawn(async move {
            gate.guard(cancel, move |term| {
                let reconciler = reconciler.clone();
                async move { reconciler.run(term).await }
            })
            .await;
        })
    } else {
        let cancel = cancel.clone();
        tokio::spawn(async move { reconciler.run(cancel).await })
    };

    let probe_listener = tokio::net::TcpListener::bind(("0.0.0.0", args.probe_port))
        .await
        .with_context(|| format!("failed to bind probe port {}", args.probe_port))?;
    tokio::spawn(async move {
        if let Err(err) = axum::serve(probe_listener, webhook::probe_router()).await {
            tracing::error!(error = %err, "probe server failed");
        }
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("failed to bind webhook port {}", args.port))?;
    tracing::info!(port = args.port, probe_port = args.probe_port, "serving admission webhook");

    let app = webhook::router(AppState { store });
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await
        .context("webhook server failed")?;

    cancel.cancel();
    reconciler_task
        .await
        .context("reconciler task panicked")?;
    tracing::info!("shutdown complete");
    Ok(())
}
