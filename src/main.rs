//! Drive Sim Server - real-time driving simulator backend
//!
//! This is the main entry point for the simulator. It handles:
//! - The authoritative physics tick loop and state broadcast
//! - WebSocket connections for the driving front-end
//! - Hardware telemetry from the steering/pedal rig
//! - Driving violation detection, logging and spoken feedback
//! - A rig-only acquisition mode and its canned self-test

mod acquisition;
mod app;
mod config;
mod feedback;
mod http;
mod sim;
mod telemetry;
mod util;
mod violation;
mod ws;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::acquisition::{run_self_test, AcquisitionService};
use crate::app::SimulationServer;
use crate::config::{Config, RunMode};
use crate::feedback::{narrator_from_config, EventLog};
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    init_tracing(&config.log_level);
    init_server_time();

    info!("Starting Drive Sim Server");
    info!(
        mode = ?config.run_mode,
        scene = %config.initial_scene,
        tick_rate_hz = config.tick_rate_hz,
        telemetry = ?config.telemetry_source,
        log_dir = %config.event_log_dir.display(),
        "Configuration loaded"
    );

    match config.run_mode {
        RunMode::Simulator => {
            let server = SimulationServer::start(config).await?;
            info!(addr = %server.local_addr(), "Simulation server running");

            shutdown_signal().await;
            info!(clients = server.state().registry.len(), "Disconnecting clients");
            server.stop().await;
        }
        RunMode::Acquisition => {
            let service = AcquisitionService::start(&config, narrator_from_config(&config)).await?;
            info!(
                scene = %config.initial_scene,
                connected = service.telemetry().is_connected(),
                "Acquisition running"
            );
            shutdown_signal().await;
            service.stop().await;
        }
        RunMode::SelfTest => {
            let events = run_self_test(
                config.initial_scene,
                &config.acquisition_settings().thresholds,
                EventLog::new(config.event_log_dir.clone()),
                narrator_from_config(&config),
            )
            .await?;
            info!(events, dir = %config.event_log_dir.display(), "Test logs written");
        }
    }

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
