//! Scanrelay worker binary.
//!
//! Runs the API poller and the queue consumer until Ctrl-C.

use anyhow::Context;
use scanrelay_worker::{RelayConfig, RelayService};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,scanrelay=debug,scanrelay_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RelayConfig::from_env().context("failed to load configuration")?;

    tracing::info!("Starting Scanrelay worker");
    tracing::info!("Scan API: {}", config.scan_api_base_url);
    tracing::info!("Queue: {}", config.queue_name);
    tracing::info!("Poll batch size: {}", config.batch_size);

    let service = RelayService::connect(&config)
        .await
        .context("failed to initialize relay service")?;

    let ctx = CancellationToken::new();
    let worker = {
        let ctx = ctx.clone();
        tokio::spawn(async move { service.run(ctx).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutting down Scanrelay worker");
    ctx.cancel();

    worker.await.context("relay service task failed")?;

    Ok(())
}
