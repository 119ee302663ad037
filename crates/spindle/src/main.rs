//! Spindle - compute node agent.

mod executor;

use clap::Parser;
use executor::{Executor, ExecutorConfig, shutdown_signal};
use miette::{IntoDiagnostic, Result};
use spindle_cli::{Args, JobFamily, load_identity};
use spindle_remote::{
    Ed25519Signer, HttpTransport, JobDialect, ProcessingJobDialect, PubsubClient,
    RemoteJobService, ScriptJobDialect,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let identity = load_identity(&args.dir).into_diagnostic()?;
    let config = args.build_config(identity).into_diagnostic()?;

    let signer = Ed25519Signer::from_hex(
        &config.identity.compute_resource_id,
        &config.identity.compute_resource_private_key,
    )
    .into_diagnostic()?;
    let transport =
        HttpTransport::new(&args.service_url, Arc::new(signer), HttpTransport::DEFAULT_TIMEOUT)
            .into_diagnostic()?;
    let dialect: Arc<dyn JobDialect> = match args.job_family {
        JobFamily::Script => Arc::new(ScriptJobDialect),
        JobFamily::Processing => Arc::new(ProcessingJobDialect),
    };
    tracing::info!(
        node_id = %config.identity.node_id,
        "Starting {} job executor against {} (container method {}, max {} jobs)",
        dialect.label(),
        transport.endpoint(),
        config.sandbox,
        config.max_concurrent_jobs
    );
    let service = Arc::new(RemoteJobService::new(
        Arc::new(transport),
        dialect,
        config.identity.clone(),
    ));

    let (tx, rx) = mpsc::channel(64);
    match service.subscription_info().await {
        Ok(info) => match PubsubClient::new(&info) {
            Ok(Some(client)) => {
                client.spawn(tx);
            }
            Ok(None) => tracing::info!("No pubsub subscription; relying on polling"),
            Err(e) => tracing::warn!("Unable to start pubsub client: {}", e),
        },
        Err(e) => tracing::warn!("Unable to get pubsub subscription: {}", e),
    }

    let executor = Executor::new(Arc::new(config), service, ExecutorConfig::default());
    executor.run(rx, shutdown_signal()).await;
    tracing::info!("Stopped");
    Ok(())
}
