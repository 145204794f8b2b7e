//! Hop gateway
//!
//! Serves the HTTP API and reaches each VM through a fresh bastion → VM
//! SSH tunnel per request.

use anyhow::Result;
use gateway_lib::{
    health::{components, HealthRegistry},
    observability::{GatewayMetrics, StructuredLogger},
    CommandRunner, DockerOps, MetricsOrchestrator, RemoteCommandExecutor, Ssh2Transport,
    TunnelManager,
};
use hop_gateway::{api, config::GatewayConfig};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const GATEWAY_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting hop-gateway");

    let config = GatewayConfig::load()?;
    config.validate()?;
    info!(
        bastion = %config.bastion.address(),
        vms = config.vms.len(),
        "Gateway configured"
    );

    let health_registry = HealthRegistry::new();
    for vm in config.vms.names() {
        health_registry.register(&components::vm(vm)).await;
    }
    health_registry.register(components::SCORER).await;

    // Register collectors before the first scrape
    let _metrics = GatewayMetrics::new();

    let logger = StructuredLogger::new(config.bastion.host.clone());

    let tunnels = TunnelManager::new(
        Ssh2Transport::new(config.timeouts.connect()),
        config.vms.clone(),
        config.bastion.clone(),
        config.vm_access.clone(),
        config.timeouts,
    );
    let runner = CommandRunner::new(tunnels, RemoteCommandExecutor::new(config.timeouts.exec()))
        .with_health(health_registry.clone());
    let scorer = config.scorer.build(config.timeouts.score());

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        MetricsOrchestrator::new(runner.clone(), scorer),
        DockerOps::new(runner),
    ));

    logger.log_startup(GATEWAY_VERSION, config.vms.len(), config.api_port);
    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        served = api_handle => {
            let reason = match served {
                Ok(Ok(())) => "API server exited".to_string(),
                Ok(Err(e)) => format!("API server failed: {:#}", e),
                Err(e) => format!("API server task failed: {}", e),
            };
            error!(reason = %reason, "Stopping");
            logger.log_shutdown(&reason);
            anyhow::bail!(reason);
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            logger.log_shutdown("SIGINT received");
            info!("Shutting down");
        }
    }

    Ok(())
}
