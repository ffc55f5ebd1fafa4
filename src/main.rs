//! ns-labeler - propagates namespace labels onto pods

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use ns_labeler::client::create_client;
use ns_labeler::config::LabelerConfig;
use ns_labeler::controller::Context;
use ns_labeler::controller_runner::build_pod_controller;
use ns_labeler::health::{bind_probes, serve_probes, Readiness};
use ns_labeler::leader_election::{LeaderElector, LeaderGuard, DEFAULT_LEASE_NAME};
use ns_labeler::telemetry::{init_telemetry, TelemetryConfig};
use ns_labeler::DEFAULT_PROBE_ADDR;

/// Copies tracked labels from opted-in namespaces onto their pods
#[derive(Parser, Debug)]
#[command(name = "ns-labeler", version, about, long_about = None)]
struct Cli {
    /// Path to a kubeconfig file (defaults to in-cluster or ~/.kube/config)
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Comma separated label keys to copy from namespace to pod
    #[arg(long, env = "LABELER_TRACKED_LABELS", default_value = "team,product,project")]
    tracked_labels: String,

    /// Seconds between resyncs of a pod that is already in sync
    #[arg(long, env = "LABELER_RESYNC_INTERVAL_SECS", default_value_t = 36_000)]
    resync_interval_secs: u64,

    /// Seconds before retrying a failed reconciliation
    #[arg(long, env = "LABELER_ERROR_REQUEUE_SECS", default_value_t = 30)]
    error_requeue_secs: u64,

    /// Address the health probe endpoint binds to
    #[arg(long, default_value = DEFAULT_PROBE_ADDR)]
    health_probe_bind_address: SocketAddr,

    /// Enable leader election, ensuring only one active replica
    #[arg(long)]
    leader_elect: bool,

    /// Namespace holding the leader election Lease
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    leader_election_namespace: String,

    /// Name of the leader election Lease
    #[arg(long, default_value = DEFAULT_LEASE_NAME)]
    leader_election_id: String,

    /// Identity recorded as Lease holder (defaults to the pod name)
    #[arg(long, env = "POD_NAME")]
    leader_election_identity: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    let telemetry = init_telemetry(TelemetryConfig::default())?;

    let result = run_controller(cli).await;
    telemetry.shutdown();
    result
}

async fn run_controller(cli: Cli) -> anyhow::Result<()> {
    let config = LabelerConfig::new(
        LabelerConfig::parse_tracked_labels(&cli.tracked_labels),
        Duration::from_secs(cli.resync_interval_secs),
        Duration::from_secs(cli.error_requeue_secs),
    )?;
    tracing::info!(config = %serde_json::to_string(&config)?, "Starting ns-labeler");

    let client = create_client(cli.kubeconfig.as_deref()).await?;

    let readiness = Readiness::new();
    let listener = bind_probes(cli.health_probe_bind_address).await?;
    let mut probes = tokio::spawn(serve_probes(listener, readiness.clone()));

    let mut guard = if cli.leader_elect {
        let identity = cli
            .leader_election_identity
            .clone()
            .unwrap_or_else(|| format!("ns-labeler-{}", std::process::id()));
        let elector = Arc::new(LeaderElector::new(
            client.clone(),
            &cli.leader_election_id,
            &cli.leader_election_namespace,
            &identity,
        ));

        tokio::select! {
            guard = elector.acquire() => Some(guard),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested before acquiring leadership");
                probes.abort();
                return Ok(());
            }
        }
    } else {
        None
    };

    let ctx = Arc::new(Context::builder(client.clone()).config(config).build());
    let controller = build_pod_controller(client, ctx);
    readiness.set(true);

    let result = tokio::select! {
        _ = controller => {
            tracing::info!("Pod controller completed");
            Ok(())
        }
        _ = leadership_lost(guard.as_mut()) => Err(anyhow::anyhow!("leadership lost, exiting")),
        exit = &mut probes => match exit {
            Ok(Ok(())) => Err(anyhow::anyhow!("health probe server exited")),
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(e.into()),
        },
    };

    readiness.set(false);
    if let Some(guard) = guard {
        release(guard).await;
    }
    probes.abort();

    result
}

/// Resolves when leadership is lost; never without leader election
async fn leadership_lost(guard: Option<&mut LeaderGuard>) {
    match guard {
        Some(guard) => guard.lost().await,
        None => std::future::pending().await,
    }
}

async fn release(guard: LeaderGuard) {
    if let Err(e) = guard.release_leadership().await {
        tracing::warn!(error = %e, "Failed to release leader lease");
    }
}
