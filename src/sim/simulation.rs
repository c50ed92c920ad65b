//! Authoritative simulation tick loop
//!
//! The loop task owns the physics engine and the current scenario outright.
//! Connection handlers reach it only through the command channel and read
//! state only from the published snapshots.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::telemetry::{SharedTelemetry, TelemetryScaling};
use crate::util::time::{tick_duration, TickClock, DEFAULT_TICK_RATE_HZ};
use crate::violation::{detect, SampleTracker, Thresholds, ViolationEvent};
use crate::ws::protocol::ServerMsg;
use crate::ws::registry::ConnectionRegistry;

use super::snapshot::{EvaluationCadence, StateSnapshot};
use super::{ControlInputs, PhysicsEngine, PhysicsParams, Scenario};

/// Pause after a failed tick before trying again
pub const RETRY_DELAY: Duration = Duration::from_millis(100);

const COMMAND_QUEUE_CAPACITY: usize = 256;
const HEARTBEAT_TICKS: u64 = 600;

/// Requests from connection handlers
#[derive(Debug, Clone)]
pub enum SimCommand {
    SetScene {
        scene: Scenario,
        client_id: Option<Uuid>,
    },
    ManualControl {
        controls: ControlInputs,
        client_id: Uuid,
    },
}

/// Loop tuning
#[derive(Debug, Clone)]
pub struct SimulationSettings {
    pub tick_rate_hz: u32,
    pub violation_interval_ticks: u32,
    pub physics: PhysicsParams,
    pub thresholds: Thresholds,
    pub scaling: TelemetryScaling,
    /// Route violation events to the test logs
    pub test_mode: bool,
    pub initial_scene: Scenario,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
            violation_interval_ticks: 60,
            physics: PhysicsParams::default(),
            thresholds: Thresholds::default(),
            scaling: TelemetryScaling::default(),
            test_mode: false,
            initial_scene: Scenario::default(),
        }
    }
}

/// What the rest of the server holds on to
#[derive(Debug, Clone)]
pub struct SimulationHandle {
    pub commands: mpsc::Sender<SimCommand>,
    pub snapshots: watch::Receiver<StateSnapshot>,
}

/// Per-tick failures. None of these stop the loop.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("Feedback queue closed")]
    FeedbackClosed,
}

pub struct Simulation {
    engine: PhysicsEngine,
    scene: Scenario,
    tick: u64,
    settings: SimulationSettings,
    command_rx: mpsc::Receiver<SimCommand>,
    snapshot_tx: watch::Sender<StateSnapshot>,
    registry: Arc<ConnectionRegistry>,
    telemetry: Option<Arc<SharedTelemetry>>,
    /// Rig inputs were applied on the previous tick
    telemetry_live: bool,
    feedback_tx: mpsc::Sender<ViolationEvent>,
    tracker: SampleTracker,
    cadence: EvaluationCadence,
}

impl Simulation {
    pub fn new(
        settings: SimulationSettings,
        registry: Arc<ConnectionRegistry>,
        telemetry: Option<Arc<SharedTelemetry>>,
        feedback_tx: mpsc::Sender<ViolationEvent>,
    ) -> (Self, SimulationHandle) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let engine = PhysicsEngine::new(settings.physics);
        let scene = settings.initial_scene;
        let (snapshot_tx, snapshot_rx) = watch::channel(StateSnapshot::new(
            0,
            scene,
            engine.state(),
            settings.physics,
        ));

        let handle = SimulationHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
        };

        let sim = Self {
            engine,
            scene,
            tick: 0,
            cadence: EvaluationCadence::new(settings.violation_interval_ticks),
            settings,
            command_rx,
            snapshot_tx,
            registry,
            telemetry,
            telemetry_live: false,
            feedback_tx,
            tracker: SampleTracker::new(),
        };

        (sim, handle)
    }

    /// Run until `shutdown` flips to true or its sender goes away
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            scene = %self.scene,
            tick_rate_hz = self.settings.tick_rate_hz,
            telemetry = self.telemetry.is_some(),
            "Simulation loop started"
        );

        let mut tick_interval = interval(tick_duration(self.settings.tick_rate_hz));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut clock = TickClock::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = tick_interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            let dt = clock.delta();
            if let Err(e) = self.tick(dt) {
                error!(tick = self.tick, error = %e, "Simulation tick failed");
                tokio::select! {
                    _ = sleep(RETRY_DELAY) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }

        info!(tick = self.tick, "Simulation loop stopped");
    }

    /// One iteration: commands, telemetry, integration, rules, publish.
    /// The new state is published even when the rule step fails.
    pub fn tick(&mut self, dt: f32) -> Result<(), SimError> {
        self.process_commands();
        self.apply_telemetry();
        self.engine.update(dt);
        self.tick += 1;

        let checked = if self.cadence.should_evaluate() {
            self.check_violations()
        } else {
            Ok(())
        };

        let snapshot = self.publish();
        self.registry.broadcast(&snapshot.to_message());

        if self.tick % HEARTBEAT_TICKS == 0 {
            info!(
                tick = self.tick,
                scene = %self.scene,
                speed = snapshot.car.speed,
                clients = self.registry.len(),
                "Simulation heartbeat"
            );
        }

        checked
    }

    fn process_commands(&mut self) {
        while let Ok(command) = self.command_rx.try_recv() {
            match command {
                SimCommand::SetScene { scene, client_id } => {
                    info!(scene = %scene, client_id = ?client_id, "Scene change requested");
                    self.change_scene(scene);
                }
                SimCommand::ManualControl {
                    controls,
                    client_id,
                } => {
                    debug!(client_id = %client_id, ?controls, "Manual control");
                    controls.apply_to(&mut self.engine);
                }
            }
        }
    }

    fn apply_telemetry(&mut self) {
        let Some(telemetry) = &self.telemetry else {
            return;
        };
        if !telemetry.is_connected() {
            if self.telemetry_live {
                // Pedals held by a dead link would keep driving the car
                warn!(tick = self.tick, "Telemetry link lost, releasing pedals");
                ControlInputs {
                    acceleration: Some(0.0),
                    deceleration: Some(0.0),
                    ..Default::default()
                }
                .apply_to(&mut self.engine);
                self.telemetry_live = false;
            }
            return;
        }
        if let Some(record) = telemetry.latest() {
            self.settings
                .scaling
                .to_controls(&record)
                .apply_to(&mut self.engine);
            self.telemetry_live = true;
        }
    }

    fn check_violations(&mut self) -> Result<(), SimError> {
        let car = self.engine.state();
        let sample = self
            .tracker
            .sample(self.scene, &car, self.settings.test_mode);
        let detection = detect(self.scene, &sample, &self.settings.thresholds);

        let mut result = Ok(());
        for kind in detection.violations {
            info!(scene = %self.scene, kind = %kind, speed = car.speed, "Violation detected");
            let event = ViolationEvent::new(kind, sample, self.settings.thresholds);
            match self.feedback_tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    warn!(kind = %event.kind, "Feedback queue full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    result = Err(SimError::FeedbackClosed);
                }
            }
        }

        if let Some(next) = detection.transition {
            info!(from = %self.scene, to = %next, "Handbrake while moving, entering parking");
            self.change_scene(next);
        }

        result
    }

    /// Reset the car into `scene` and tell every client
    fn change_scene(&mut self, scene: Scenario) {
        self.scene = scene;
        self.engine.reset();
        self.tracker.reset();
        self.cadence.reset();
        self.registry.broadcast(&ServerMsg::SceneChanged { scene });
    }

    fn publish(&self) -> StateSnapshot {
        let snapshot = StateSnapshot::new(
            self.tick,
            self.scene,
            self.engine.state(),
            *self.engine.params(),
        );
        self.snapshot_tx.send_replace(snapshot);
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::Gear;
    use crate::telemetry::RawFrame;
    use crate::violation::ViolationKind;

    struct Harness {
        sim: Simulation,
        handle: SimulationHandle,
        registry: Arc<ConnectionRegistry>,
        feedback_rx: mpsc::Receiver<ViolationEvent>,
    }

    fn harness(settings: SimulationSettings, telemetry: Option<Arc<SharedTelemetry>>) -> Harness {
        let registry = Arc::new(ConnectionRegistry::new());
        let (feedback_tx, feedback_rx) = mpsc::channel(16);
        let (sim, handle) = Simulation::new(settings, registry.clone(), telemetry, feedback_tx);
        Harness {
            sim,
            handle,
            registry,
            feedback_rx,
        }
    }

    fn every_tick() -> SimulationSettings {
        SimulationSettings {
            violation_interval_ticks: 1,
            ..Default::default()
        }
    }

    fn drive(acceleration: f32) -> SimCommand {
        SimCommand::ManualControl {
            controls: ControlInputs {
                acceleration: Some(acceleration),
                gear: Some(Gear::Drive),
                ..Default::default()
            },
            client_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn manual_control_reaches_the_published_snapshot() {
        let mut h = harness(SimulationSettings::default(), None);
        h.handle.commands.try_send(drive(50.0)).unwrap();

        h.sim.tick(0.1).unwrap();

        let snapshot = *h.handle.snapshots.borrow();
        assert_eq!(snapshot.tick, 1);
        assert_eq!(snapshot.car.gear, Gear::Drive);
        assert!(snapshot.car.speed > 0.0);
        assert!(snapshot.car.position.y < 0.0);
    }

    #[test]
    fn every_tick_broadcasts_state() {
        let mut h = harness(SimulationSettings::default(), None);
        let (tx, mut rx) = mpsc::channel(8);
        h.registry.register(tx);

        h.sim.tick(0.016).unwrap();
        h.sim.tick(0.016).unwrap();

        for _ in 0..2 {
            let text = rx.try_recv().unwrap();
            assert!(text.contains(r#""type":"state_update""#));
        }
    }

    #[test]
    fn set_scene_resets_and_notifies() {
        let mut h = harness(SimulationSettings::default(), None);
        let (tx, mut rx) = mpsc::channel(8);
        h.registry.register(tx);

        h.handle.commands.try_send(drive(80.0)).unwrap();
        h.sim.tick(0.1).unwrap();
        rx.try_recv().unwrap();

        h.handle
            .commands
            .try_send(SimCommand::SetScene {
                scene: Scenario::Intersection,
                client_id: None,
            })
            .unwrap();
        h.sim.tick(0.1).unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            r#"{"type":"scene_changed","scene":"intersection"}"#
        );
        assert!(rx.try_recv().unwrap().contains(r#""scene":"intersection""#));

        let snapshot = *h.handle.snapshots.borrow();
        assert_eq!(snapshot.scene, Scenario::Intersection);
        assert_eq!(snapshot.car.speed, 0.0);
        assert_eq!(snapshot.car.gear, Gear::Park);
    }

    #[test]
    fn overspeed_is_forwarded_to_feedback() {
        let mut h = harness(every_tick(), None);
        h.handle.commands.try_send(drive(10_000.0)).unwrap();

        h.sim.tick(0.25).unwrap();

        let event = h.feedback_rx.try_recv().unwrap();
        assert_eq!(event.scenario, Scenario::Highway);
        assert_eq!(event.kind, ViolationKind::Overspeed);
        assert!(h.feedback_rx.try_recv().is_err());
    }

    #[test]
    fn violations_only_checked_on_cadence() {
        let settings = SimulationSettings {
            violation_interval_ticks: 3,
            ..Default::default()
        };
        let mut h = harness(settings, None);
        h.handle.commands.try_send(drive(10_000.0)).unwrap();

        h.sim.tick(0.25).unwrap();
        h.sim.tick(0.25).unwrap();
        assert!(h.feedback_rx.try_recv().is_err());

        h.sim.tick(0.25).unwrap();
        assert!(h.feedback_rx.try_recv().is_ok());
    }

    #[test]
    fn handbrake_while_moving_switches_to_parking() {
        let mut h = harness(every_tick(), None);
        h.handle
            .commands
            .try_send(SimCommand::ManualControl {
                controls: ControlInputs {
                    acceleration: Some(50.0),
                    gear: Some(Gear::Drive),
                    handbrake: Some(true),
                    ..Default::default()
                },
                client_id: Uuid::new_v4(),
            })
            .unwrap();

        h.sim.tick(0.1).unwrap();

        let snapshot = *h.handle.snapshots.borrow();
        assert_eq!(snapshot.scene, Scenario::Parking);
        assert_eq!(snapshot.car.speed, 0.0);
    }

    #[test]
    fn telemetry_drives_the_car_once_connected() {
        let telemetry = Arc::new(SharedTelemetry::new());
        let mut h = harness(SimulationSettings::default(), Some(telemetry.clone()));

        telemetry.store(RawFrame {
            acceleration: 300.0,
            deceleration: 400.0,
            steering: 5,
            handbrake: false,
            gear: Some(Gear::Drive),
            turn_signal: None,
        });

        // Stored but not connected: ignored
        h.sim.tick(0.1).unwrap();
        assert_eq!(h.handle.snapshots.borrow().car.gear, Gear::Park);

        telemetry.set_connected(true);
        h.sim.tick(0.1).unwrap();
        let car = h.handle.snapshots.borrow().car;
        assert_eq!(car.gear, Gear::Drive);
        assert_eq!(car.acceleration_rate, 100.0);
        assert_eq!(car.steering_angle, 15.0);
        assert!(car.speed > 0.0);
    }

    #[test]
    fn lost_telemetry_link_releases_the_pedals() {
        let telemetry = Arc::new(SharedTelemetry::new());
        let mut h = harness(SimulationSettings::default(), Some(telemetry.clone()));

        telemetry.store(RawFrame {
            acceleration: 300.0,
            deceleration: 400.0,
            steering: 0,
            handbrake: false,
            gear: Some(Gear::Drive),
            turn_signal: None,
        });
        telemetry.set_connected(true);
        h.sim.tick(0.1).unwrap();
        let at_disconnect = h.handle.snapshots.borrow().car.speed;
        assert!(at_disconnect > 0.0);

        telemetry.set_connected(false);
        for _ in 0..120 {
            h.sim.tick(0.1).unwrap();
        }

        let car = h.handle.snapshots.borrow().car;
        assert_eq!(car.acceleration_rate, 0.0);
        assert!(car.speed < at_disconnect);
        assert_eq!(car.gear, Gear::Drive);
    }

    #[test]
    fn manual_control_works_after_telemetry_drops() {
        let telemetry = Arc::new(SharedTelemetry::new());
        let mut h = harness(SimulationSettings::default(), Some(telemetry.clone()));

        telemetry.store(RawFrame {
            acceleration: 300.0,
            deceleration: 400.0,
            gear: Some(Gear::Drive),
            ..Default::default()
        });
        telemetry.set_connected(true);
        h.sim.tick(0.1).unwrap();
        telemetry.set_connected(false);
        h.sim.tick(0.1).unwrap();

        h.handle.commands.try_send(drive(40.0)).unwrap();
        h.sim.tick(0.1).unwrap();
        h.sim.tick(0.1).unwrap();
        assert_eq!(h.handle.snapshots.borrow().car.acceleration_rate, 40.0);
    }

    #[test]
    fn closed_feedback_fails_tick_but_still_publishes() {
        let mut h = harness(every_tick(), None);
        h.handle.commands.try_send(drive(10_000.0)).unwrap();
        drop(h.feedback_rx);

        let result = h.sim.tick(0.25);

        assert!(matches!(result, Err(SimError::FeedbackClosed)));
        assert_eq!(h.handle.snapshots.borrow().tick, 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let h = harness(SimulationSettings::default(), None);
        let mut snapshots = h.handle.snapshots.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(h.sim.run(shutdown_rx));

        snapshots.changed().await.unwrap();
        assert!(snapshots.borrow().tick >= 1);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
