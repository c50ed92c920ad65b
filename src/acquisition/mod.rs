//! Data acquisition mode: rule checks straight from rig readings
//!
//! There is no physics step and no client channel. On a fixed interval the
//! latest telemetry record is turned into a `DrivingSample` for one scenario
//! and run through that scenario's rule table. Matches go to the same
//! feedback worker the simulator uses.


use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::app::server::join_bounded;
use crate::config::Config;
use crate::feedback::{spawn_worker, EventLog, FeedbackDispatcher, Narrator, FEEDBACK_QUEUE_CAPACITY};
use crate::sim::{Gear, Scenario, TurnSignal};
use crate::telemetry::ingest::TelemetryRecord;
use crate::telemetry::{spawn_reader, SharedTelemetry, TelemetryError, TelemetryScaling};
use crate::violation::rules::evaluate;
use crate::violation::{DrivingSample, SampleTracker, Thresholds, ViolationEvent};

pub use self_test::run_self_test;

pub const DEFAULT_ACQUISITION_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
    /// Every reading is judged under this scenario
    pub scenario: Scenario,
    pub interval: Duration,
    pub thresholds: Thresholds,
    pub scaling: TelemetryScaling,
    pub test_mode: bool,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            scenario: Scenario::default(),
            interval: DEFAULT_ACQUISITION_INTERVAL,
            thresholds: Thresholds::default(),
            scaling: TelemetryScaling::default(),
            test_mode: false,
        }
    }
}

/// Turns successive rig readings into samples. Gear and turn signal keep
/// their last known value when a frame carries an unknown code.
#[derive(Debug)]
pub struct ReadingSampler {
    scenario: Scenario,
    scaling: TelemetryScaling,
    test_mode: bool,
    tracker: SampleTracker,
    gear: Gear,
    turn_signal: TurnSignal,
}

impl ReadingSampler {
    pub fn new(settings: &AcquisitionSettings) -> Self {
        Self {
            scenario: settings.scenario,
            scaling: settings.scaling,
            test_mode: settings.test_mode,
            tracker: SampleTracker::new(),
            gear: Gear::default(),
            turn_signal: TurnSignal::default(),
        }
    }

    /// The rig has no speed or range sensors, so samples are stationary
    /// with no front distance. Steering is the scaled rig angle, unclamped.
    pub fn sample(&mut self, record: &TelemetryRecord) -> DrivingSample {
        let controls = self.scaling.to_controls(record);
        if let Some(gear) = controls.gear {
            self.gear = gear;
        }
        if let Some(signal) = controls.turn_signal {
            self.turn_signal = signal;
        }

        let steering_angle = controls.steering_angle.unwrap_or(0.0);
        DrivingSample {
            throttle: controls.acceleration.unwrap_or(0.0),
            brake: controls.deceleration.unwrap_or(0.0),
            steering_angle,
            steering_change: self.tracker.steering_changed(steering_angle),
            turn_signal: self.turn_signal,
            handbrake: record.frame.handbrake,
            gear: self.gear,
            test_mode: self.test_mode,
            ..DrivingSample::idle(self.scenario)
        }
    }
}

/// Run the rules on one sample and queue an event per match. Returns the
/// number of events queued.
pub fn check_sample(
    sample: &DrivingSample,
    thresholds: &Thresholds,
    feedback_tx: &mpsc::Sender<ViolationEvent>,
) -> Result<usize, AcquisitionError> {
    let mut queued = 0;
    for kind in evaluate(sample.scenario, sample, thresholds) {
        info!(scene = %sample.scenario, kind = %kind, "Violation detected");
        match feedback_tx.try_send(ViolationEvent::new(kind, *sample, *thresholds)) {
            Ok(()) => queued += 1,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(kind = %event.kind, "Feedback queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                return Err(AcquisitionError::FeedbackClosed);
            }
        }
    }
    Ok(queued)
}

/// Sample the shared record every `settings.interval` until `shutdown`
/// flips or the feedback worker goes away
pub async fn run_acquisition(
    settings: AcquisitionSettings,
    telemetry: Arc<SharedTelemetry>,
    feedback_tx: mpsc::Sender<ViolationEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        scene = %settings.scenario,
        interval_ms = settings.interval.as_millis() as u64,
        "Acquisition loop started"
    );

    let mut ticker = interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut sampler = ReadingSampler::new(&settings);
    let mut live = false;
    let mut checks = 0u64;

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        if !telemetry.is_connected() {
            if live {
                warn!(checks, "Telemetry link lost, waiting");
                live = false;
            }
            continue;
        }
        let Some(record) = telemetry.latest() else {
            continue;
        };
        live = true;

        let sample = sampler.sample(&record);
        checks += 1;
        match check_sample(&sample, &settings.thresholds, &feedback_tx) {
            Ok(queued) => debug!(sequence = record.sequence, queued, "Reading checked"),
            Err(e) => {
                error!(error = %e, "Stopping acquisition");
                break;
            }
        }
    }

    info!(checks, "Acquisition loop stopped");
}

/// A running acquisition pipeline: rig reader, rule loop, feedback worker
pub struct AcquisitionService {
    telemetry: Arc<SharedTelemetry>,
    shutdown_tx: watch::Sender<bool>,
    loop_task: JoinHandle<()>,
    feedback_task: JoinHandle<()>,
    reader_task: JoinHandle<()>,
}

impl AcquisitionService {
    /// Open the rig and start sampling. A missing source and an open
    /// failure are both errors here.
    pub async fn start(
        config: &Config,
        narrator: Arc<dyn Narrator>,
    ) -> Result<Self, AcquisitionError> {
        let source = config
            .telemetry_source
            .as_ref()
            .ok_or(AcquisitionError::NoTelemetrySource)?;
        let reader = source.open().await?;
        info!(source = %source, scene = %config.initial_scene, "Telemetry source opened");

        let telemetry = Arc::new(SharedTelemetry::new());
        let reader_task = spawn_reader(reader, telemetry.clone());

        let (feedback_tx, feedback_task) = spawn_worker(
            EventLog::new(config.event_log_dir.clone()),
            FeedbackDispatcher::new(narrator),
            FEEDBACK_QUEUE_CAPACITY,
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let loop_task = tokio::spawn(run_acquisition(
            config.acquisition_settings(),
            telemetry.clone(),
            feedback_tx,
            shutdown_rx,
        ));

        Ok(Self {
            telemetry,
            shutdown_tx,
            loop_task,
            feedback_task,
            reader_task,
        })
    }

    pub fn telemetry(&self) -> &Arc<SharedTelemetry> {
        &self.telemetry
    }

    pub async fn stop(self) {
        info!("Stopping acquisition");
        let _ = self.shutdown_tx.send(true);

        join_bounded("acquisition loop", self.loop_task).await;
        join_bounded("feedback worker", self.feedback_task).await;
        self.reader_task.abort();
        self.telemetry.set_connected(false);

        info!("Acquisition stopped");
    }
}

/// Acquisition errors
#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("Acquisition needs TELEMETRY_SOURCE")]
    NoTelemetrySource,

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("Feedback queue closed")]
    FeedbackClosed,

    #[error("Feedback worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::SilentNarrator;
    use crate::telemetry::frame::tests::frame_bytes;
    use crate::telemetry::{RawFrame, TelemetrySource};
    use crate::violation::ViolationKind;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn record(frame: RawFrame, sequence: u64) -> TelemetryRecord {
        TelemetryRecord { frame, sequence }
    }

    fn settings(scenario: Scenario) -> AcquisitionSettings {
        AcquisitionSettings {
            scenario,
            interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[test]
    fn sampler_scales_pedals_and_tracks_steering() {
        let mut sampler = ReadingSampler::new(&settings(Scenario::Intersection));

        let first = sampler.sample(&record(
            RawFrame {
                acceleration: 300.0,
                deceleration: 100.0,
                steering: 1,
                gear: Some(Gear::Drive),
                turn_signal: Some(TurnSignal::Left),
                ..Default::default()
            },
            1,
        ));
        assert_eq!(first.scenario, Scenario::Intersection);
        assert_eq!(first.throttle, 100.0);
        assert_eq!(first.brake, 20.0);
        assert_eq!(first.steering_angle, 3.0);
        assert!(!first.steering_change);
        assert_eq!(first.speed, 0.0);
        assert_eq!(first.front_distance, None);

        // 3 -> 21 degrees, gear code garbled
        let second = sampler.sample(&record(
            RawFrame {
                acceleration: 700.0,
                deceleration: 400.0,
                steering: 7,
                gear: None,
                turn_signal: None,
                ..Default::default()
            },
            2,
        ));
        assert!(second.steering_change);
        assert_eq!(second.gear, Gear::Drive);
        assert_eq!(second.turn_signal, TurnSignal::Left);
    }

    #[test]
    fn check_sample_reports_closed_worker() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let sample = DrivingSample {
            speed: 120.0,
            ..DrivingSample::idle(Scenario::Highway)
        };
        assert!(matches!(
            check_sample(&sample, &Thresholds::default(), &tx),
            Err(AcquisitionError::FeedbackClosed)
        ));
    }

    #[tokio::test]
    async fn loop_checks_live_readings() {
        let telemetry = Arc::new(SharedTelemetry::new());
        telemetry.store(RawFrame {
            acceleration: 300.0,
            deceleration: 400.0,
            gear: Some(Gear::Drive),
            ..Default::default()
        });
        telemetry.set_connected(true);

        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_acquisition(
            settings(Scenario::Intersection),
            telemetry,
            tx,
            shutdown_rx,
        ));

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.scenario, Scenario::Intersection);
        assert_eq!(event.kind, ViolationKind::HarshAcceleration);
        assert!(!event.sample.test_mode);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn disconnected_rig_is_not_sampled() {
        let telemetry = Arc::new(SharedTelemetry::new());
        telemetry.store(RawFrame {
            acceleration: 300.0,
            ..Default::default()
        });

        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_acquisition(
            settings(Scenario::Intersection),
            telemetry,
            tx,
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn start_requires_a_telemetry_source() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            event_log_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let result = AcquisitionService::start(&config, Arc::new(SilentNarrator)).await;
        assert!(matches!(result, Err(AcquisitionError::NoTelemetrySource)));

        let config = Config {
            telemetry_source: Some(TelemetrySource::Device(dir.path().join("no-such-rig"))),
            ..config
        };
        let result = AcquisitionService::start(&config, Arc::new(SilentNarrator)).await;
        assert!(matches!(result, Err(AcquisitionError::Telemetry(_))));
    }

    #[tokio::test]
    async fn rig_readings_end_up_in_the_event_log() {
        let dir = tempfile::tempdir().unwrap();
        let rig = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let rig_addr = rig.local_addr().unwrap();
        let (hang_up_tx, hang_up_rx) = tokio::sync::oneshot::channel::<()>();
        let rig_task = tokio::spawn(async move {
            let (mut stream, _) = rig.accept().await.unwrap();
            // Hard throttle in drive
            stream
                .write_all(&frame_bytes(300.0, 400.0, 0, false, b'D', b'N'))
                .await
                .unwrap();
            let _ = hang_up_rx.await;
        });

        let config = Config {
            telemetry_source: Some(TelemetrySource::Tcp(rig_addr.to_string())),
            initial_scene: Scenario::Intersection,
            acquisition_interval: Duration::from_millis(10),
            event_log_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let service = AcquisitionService::start(&config, Arc::new(SilentNarrator))
            .await
            .unwrap();

        let log = EventLog::new(dir.path());
        let path = log.path_for(Scenario::Intersection, false);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !path.exists() || EventLog::read_rows(&path).unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(service.telemetry().is_connected());

        service.stop().await;
        let _ = hang_up_tx.send(());
        rig_task.await.unwrap();

        let rows = EventLog::read_rows(&path).unwrap();
        assert_eq!(rows[0][1], "intersection");
        assert_eq!(rows[0][2], "harsh_acceleration");
    }
}
