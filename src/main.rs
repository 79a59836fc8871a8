//! BYOH Operator - admits bring-your-own-host machines into a cluster

use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use byoh_operator::config::{OperatorArgs, OperatorConfig};
use byoh_operator::controller::{compute_plan, run, Context};
use byoh_operator::events::NoopEventPublisher;
use byoh_operator::retry::{retry_with_backoff, RetryConfig};
use byoh_operator::tracking::ensure_instances_config_map;

/// Attempts made to create the tracking ConfigMap before giving up at startup
const STARTUP_ENSURE_ATTEMPTS: u32 = 10;

/// BYOH operator - reconciles a host list against cluster members
#[derive(Parser, Debug)]
#[command(name = "byoh-operator", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    operator: OperatorArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Ensures the tracking ConfigMap exists, then watches it and the
    /// cluster's Nodes and reconciles on every relevant change until
    /// SIGINT/SIGTERM.
    Controller,

    /// Create the tracking ConfigMap if it is missing, then exit
    Ensure,

    /// Print the actions the next pass would take, without taking them
    Plan,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = OperatorConfig::from(cli.operator);

    match cli.command {
        Some(Commands::Ensure) => run_ensure(&config).await,
        Some(Commands::Plan) => run_plan(config).await,
        Some(Commands::Controller) | None => run_controller(config).await,
    }
}

/// Create the tracking ConfigMap, retrying transient failures
async fn ensure_tracking(config: &OperatorConfig) -> anyhow::Result<kube::Config> {
    let kube_config = kube::Config::infer()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load Kubernetes config: {}", e))?;

    retry_with_backoff(
        &RetryConfig::with_max_attempts(STARTUP_ENSURE_ATTEMPTS),
        "ensure_instances_config_map",
        || ensure_instances_config_map(Some(kube_config.clone()), &config.tracking),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to ensure {}: {}", config.tracking, e))?;

    Ok(kube_config)
}

/// Run the startup bootstrap only
async fn run_ensure(config: &OperatorConfig) -> anyhow::Result<()> {
    ensure_tracking(config).await?;
    println!("ConfigMap {} is present", config.tracking);
    Ok(())
}

/// Print the current plan as YAML
async fn run_plan(config: OperatorConfig) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let ctx = Context::builder(client)
        .config(config)
        .events(Arc::new(NoopEventPublisher))
        .build();

    let plan = compute_plan(&ctx)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to compute plan: {}", e))?;
    let yaml = serde_yaml::to_string(&plan)
        .map_err(|e| anyhow::anyhow!("Failed to serialize plan: {}", e))?;
    print!("{yaml}");
    Ok(())
}

/// Run the controller until a shutdown signal arrives
async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    tracing::info!(
        configmap = %config.tracking,
        secret = %config.private_key,
        "BYOH controller starting..."
    );

    let kube_config = ensure_tracking(&config).await?;
    let client = Client::try_from(kube_config)
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let cancel = CancellationToken::new();
    let ctx = Arc::new(
        Context::builder(client.clone())
            .config(config)
            .shutdown(cancel.clone())
            .build(),
    );

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        on_signal.cancel();
    });

    run(ctx, client).await;
    tracing::info!("BYOH controller stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
