//! Application state shared across routes

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::sim::{SimCommand, SimulationHandle, StateSnapshot};
use crate::telemetry::SharedTelemetry;
use crate::ws::registry::ConnectionRegistry;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ConnectionRegistry>,
    /// Requests into the simulation loop
    pub commands: mpsc::Sender<SimCommand>,
    /// Latest state published by the simulation loop
    pub snapshots: watch::Receiver<StateSnapshot>,
    pub telemetry: Option<Arc<SharedTelemetry>>,
}

impl AppState {
    pub fn new(
        config: Config,
        registry: Arc<ConnectionRegistry>,
        simulation: SimulationHandle,
        telemetry: Option<Arc<SharedTelemetry>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            commands: simulation.commands,
            snapshots: simulation.snapshots,
            telemetry,
        }
    }

    /// Copy of the most recently published state
    pub fn snapshot(&self) -> StateSnapshot {
        *self.snapshots.borrow()
    }

    pub fn telemetry_connected(&self) -> bool {
        self.telemetry
            .as_ref()
            .map_or(false, |telemetry| telemetry.is_connected())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sim::{CarState, PhysicsParams, Scenario};

    /// State wired to bare channels instead of a running simulation
    pub(crate) fn test_state() -> (
        AppState,
        mpsc::Receiver<SimCommand>,
        watch::Sender<StateSnapshot>,
    ) {
        let (commands, command_rx) = mpsc::channel(16);
        let (snapshot_tx, snapshots) = watch::channel(StateSnapshot::new(
            0,
            Scenario::Highway,
            CarState::default(),
            PhysicsParams::default(),
        ));
        let state = AppState::new(
            Config::default(),
            Arc::new(ConnectionRegistry::new()),
            SimulationHandle {
                commands,
                snapshots,
            },
            None,
        );
        (state, command_rx, snapshot_tx)
    }

    #[test]
    fn snapshot_reads_latest_published_state() {
        let (state, _commands, snapshot_tx) = test_state();
        snapshot_tx.send_replace(StateSnapshot::new(
            42,
            Scenario::Parking,
            CarState::default(),
            PhysicsParams::default(),
        ));

        let snapshot = state.snapshot();
        assert_eq!(snapshot.tick, 42);
        assert_eq!(snapshot.scene, Scenario::Parking);
        assert!(!state.telemetry_connected());
    }
}
