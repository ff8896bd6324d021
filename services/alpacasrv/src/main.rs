//! Alpaca device server (alpacasrv)

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use alpacasrv::{
    api::{create_api_routes, AppState},
    config::AppConfig,
    core::factory::build_registry,
    SERVICE_NAME,
};
use common::{
    service_bootstrap::{init_service_logging, print_startup_banner},
    ServiceArgs, ServiceInfo, ShutdownTrigger,
};

#[derive(Parser, Debug)]
#[command(name = "alpacasrv", version, about = "Alpaca device-control service")]
struct Args {
    #[command(flatten)]
    service: ServiceArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let service_args = args.service;

    // Config first: it decides where the log files go
    let config_path = service_args.config_path(SERVICE_NAME);
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {config_path}"))?;

    let service_info = ServiceInfo::new(
        config.service.name.clone(),
        env!("CARGO_PKG_VERSION"),
        "Alpaca device-control service for astronomical instruments",
        config.service.port,
    );
    init_service_logging(
        &service_info,
        &service_args,
        config.logging.dir.as_deref(),
        config.logging.json,
    )?;
    if !service_args.no_color {
        print_startup_banner(&service_info);
    }

    if service_args.validate {
        info!(
            "Configuration {} is valid: {} device(s)",
            config_path,
            config.devices.len()
        );
        return Ok(());
    }

    let registry =
        Arc::new(build_registry(&config.devices).context("Failed to build device registry")?);
    info!("{} device(s) registered", registry.len());

    let state = AppState::new(
        Arc::clone(&registry),
        config.server.clone(),
        &config.service.name,
    );
    let app = create_api_routes(state);

    let addr = service_args
        .bind_address
        .clone()
        .unwrap_or_else(|| config.bind_address());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("API server listening on http://{}", addr);
    info!("Management: http://{}/management/apiversions", addr);
    info!("Health check: http://{}/health", addr);

    let shutdown = ShutdownTrigger::new();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.listen())
        .await
        .context("Server error")?;

    match shutdown.signal() {
        Some(signal) => info!("Stopped by {}, disconnecting devices", signal),
        None => info!("Server exited, disconnecting devices"),
    }
    registry.disconnect_all().await;
    info!("{} stopped", config.service.name);
    Ok(())
}
