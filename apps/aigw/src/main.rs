use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();

    let config = aigw_filterapi::Config::load(&cli.config)
        .with_context(|| format!("loading filter config from {}", cli.config))?;
    info!(
        event = "config_loaded",
        uuid = %config.uuid,
        rules = config.rules.len(),
        models = config.models.len(),
    );

    let state = Arc::new(
        aigw_extproc::GatewayState::new(config).context("building gateway state")?,
    );

    let mut rotators = Vec::new();
    for path in &cli.gcp_rotator_configs {
        let rotator_config = aigw_auth::rotator::RotatorConfig::load(path)
            .with_context(|| format!("loading rotator config from {path}"))?;
        let check_interval = rotator_config.check_interval();
        let rotator = aigw_auth::rotator::GcpTokenRotator::new(rotator_config);
        info!(event = "rotator_started", backend = %rotator.name());
        rotators.push(tokio::spawn(aigw_auth::rotator::run_scheduler(
            rotator,
            check_interval,
        )));
    }

    let addr = cli
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {}", cli.listen))?;
    let service = aigw_extproc::ExternalProcessorService::new(state);

    info!(event = "listening", addr = %cli.listen);
    tonic::transport::Server::builder()
        .add_service(service.into_server())
        .serve_with_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!(event = "shutdown_requested");
        })
        .await?;

    // Rotators run until the process exits; stop them with the server.
    for rotator in rotators {
        rotator.abort();
    }
    Ok(())
}
