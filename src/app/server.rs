//! Simulation server lifecycle: start everything, stop everything

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::feedback::{
    narrator_from_config, spawn_worker, EventLog, FeedbackDispatcher, Narrator,
    FEEDBACK_QUEUE_CAPACITY,
};
use crate::http::build_router;
use crate::sim::Simulation;
use crate::telemetry::{spawn_reader, SharedTelemetry};
use crate::ws::registry::ConnectionRegistry;

use super::AppState;

/// Longest wait for each background task during `stop`
pub const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// A running server. Dropping it without `stop` leaves the tasks running.
pub struct SimulationServer {
    local_addr: SocketAddr,
    state: AppState,
    shutdown_tx: watch::Sender<bool>,
    sim_task: JoinHandle<()>,
    http_task: JoinHandle<std::io::Result<()>>,
    feedback_task: JoinHandle<()>,
    telemetry_task: Option<JoinHandle<()>>,
}

impl SimulationServer {
    /// Start with the narrator chosen by `config`
    pub async fn start(config: Config) -> Result<Self, ServerError> {
        let narrator = narrator_from_config(&config);
        Self::start_with_narrator(config, narrator).await
    }

    /// Bind, open telemetry, then spawn the feedback worker, the tick loop
    /// and the HTTP server. Only a bind failure is fatal.
    pub async fn start_with_narrator(
        config: Config,
        narrator: Arc<dyn Narrator>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.server_addr)
            .await
            .map_err(|e| ServerError::Bind(config.server_addr, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Bind(config.server_addr, e))?;

        let (telemetry, telemetry_task) = match &config.telemetry_source {
            Some(source) => {
                let shared = Arc::new(SharedTelemetry::new());
                let task = match source.open().await {
                    Ok(reader) => {
                        info!(source = %source, "Telemetry source opened");
                        Some(spawn_reader(reader, shared.clone()))
                    }
                    Err(e) => {
                        error!(source = %source, error = %e, "Telemetry unavailable, manual control only");
                        None
                    }
                };
                (Some(shared), task)
            }
            None => (None, None),
        };

        let registry = Arc::new(ConnectionRegistry::new());
        let (feedback_tx, feedback_task) = spawn_worker(
            EventLog::new(config.event_log_dir.clone()),
            FeedbackDispatcher::new(narrator),
            FEEDBACK_QUEUE_CAPACITY,
        );

        let (simulation, handle) = Simulation::new(
            config.simulation_settings(),
            registry.clone(),
            telemetry.clone(),
            feedback_tx,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sim_task = tokio::spawn(simulation.run(shutdown_rx.clone()));

        let state = AppState::new(config, registry, handle, telemetry);
        let router = build_router(state.clone());
        let mut http_shutdown = shutdown_rx;
        let http_task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = http_shutdown.wait_for(|stop| *stop).await;
                })
                .await
        });

        info!("Server listening on {}", local_addr);
        info!("Health check: http://{}/health", local_addr);
        info!("WebSocket endpoint: ws://{}/ws", local_addr);

        Ok(Self {
            local_addr,
            state,
            shutdown_tx,
            sim_task,
            http_task,
            feedback_task,
            telemetry_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Stop the tick loop, close every client, then wind down the HTTP
    /// server, the feedback worker and the telemetry reader.
    pub async fn stop(self) {
        info!("Stopping simulation server");
        let _ = self.shutdown_tx.send(true);

        join_bounded("simulation loop", self.sim_task).await;
        self.state.registry.close_all();
        join_bounded("http server", self.http_task).await;
        join_bounded("feedback worker", self.feedback_task).await;

        if let Some(task) = self.telemetry_task {
            task.abort();
        }
        if let Some(telemetry) = &self.state.telemetry {
            telemetry.set_connected(false);
        }

        info!("Server shutdown complete");
    }
}

/// Await `task` for up to `STOP_TIMEOUT`, aborting it after that
pub(crate) async fn join_bounded<T>(name: &str, mut task: JoinHandle<T>) {
    match tokio::time::timeout(STOP_TIMEOUT, &mut task).await {
        Ok(Ok(_)) => debug!(task = name, "Task finished"),
        Ok(Err(e)) => warn!(task = name, error = %e, "Task ended abnormally"),
        Err(_) => {
            warn!(task = name, "Task did not stop in time, aborting");
            task.abort();
        }
    }
}

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {0}: {1}")]
    Bind(SocketAddr, #[source] std::io::Error),
}
