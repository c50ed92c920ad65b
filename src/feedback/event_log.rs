//! Append-only CSV log of violation events

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::sim::Scenario;
use crate::violation::ViolationEvent;

/// Column header, written once when a log file is created
pub const HEADER: [&str; 16] = [
    "timestamp",
    "scenario",
    "event_kind",
    "narrated_prompt",
    "throttle",
    "brake",
    "steering_angle",
    "turn_signal",
    "handbrake",
    "speed",
    "front_distance",
    "safe_distance_threshold",
    "steering_change",
    "mode",
    "corner_distances",
    "distance_sum_threshold",
];

/// One log file per scenario, with a separate file for test runs.
/// Rows are only ever appended.
#[derive(Debug, Clone)]
pub struct EventLog {
    dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl EventLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File that events for `scenario` land in
    pub fn path_for(&self, scenario: Scenario, test_mode: bool) -> PathBuf {
        let suffix = if test_mode { "_test" } else { "" };
        self.dir.join(format!("{}_errors{}.csv", scenario, suffix))
    }

    /// Append one event, creating the file with its header if needed.
    /// Returns the file written to.
    pub fn record(&self, event: &ViolationEvent) -> Result<PathBuf, EventLogError> {
        let _guard = self.write_lock.lock();

        fs::create_dir_all(&self.dir).map_err(EventLogError::Io)?;
        let path = self.path_for(event.scenario, event.sample.test_mode);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => {
                let mut writer = csv::Writer::from_writer(file);
                writer.write_record(HEADER)?;
                writer.flush().map_err(EventLogError::Io)?;
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(EventLogError::Io(e)),
        }

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(EventLogError::Io)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(row(event))?;
        writer.flush().map_err(EventLogError::Io)?;

        Ok(path)
    }

    /// Read back every data row of a log file (header excluded)
    pub fn read_rows(path: &Path) -> Result<Vec<Vec<String>>, EventLogError> {
        let mut reader = csv::Reader::from_path(path)?;
        reader
            .records()
            .map(|record| {
                record
                    .map(|r| r.iter().map(str::to_string).collect())
                    .map_err(EventLogError::Csv)
            })
            .collect()
    }
}

fn row(event: &ViolationEvent) -> [String; 16] {
    let s = &event.sample;
    [
        event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        event.scenario.to_string(),
        event.kind.to_string(),
        event.narrated_prompt().to_string(),
        s.throttle.to_string(),
        s.brake.to_string(),
        s.steering_angle.to_string(),
        s.turn_signal.to_string(),
        s.handbrake.to_string(),
        s.speed.to_string(),
        s.front_distance.map(|d| d.to_string()).unwrap_or_default(),
        event.thresholds.safe_following_distance.to_string(),
        s.steering_change.to_string(),
        s.mode().to_string(),
        s.corner_distances
            .map(|corners| {
                corners
                    .iter()
                    .map(f32::to_string)
                    .collect::<Vec<_>>()
                    .join(";")
            })
            .unwrap_or_default(),
        event.thresholds.corner_distance_sum.to_string(),
    ]
}

/// Event log errors
#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("Event log I/O failed: {0}")]
    Io(#[source] io::Error),

    #[error("Event log CSV error: {0}")]
    Csv(#[from] csv::Error),
}
