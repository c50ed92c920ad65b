//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::acquisition::AcquisitionSettings;
use crate::sim::{Scenario, SimulationSettings};
use crate::telemetry::TelemetrySource;
use crate::util::time::DEFAULT_TICK_RATE_HZ;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub run_mode: RunMode,

    pub tick_rate_hz: u32,
    /// Ticks between violation checks
    pub violation_interval_ticks: u32,
    /// Starting scene, and the fixed scene in acquisition modes
    pub initial_scene: Scenario,
    /// Time between rule checks in acquisition mode
    pub acquisition_interval: Duration,

    /// Hardware link; manual control only when unset
    pub telemetry_source: Option<TelemetrySource>,

    /// Directory for the violation CSV logs
    pub event_log_dir: PathBuf,
    /// Write violations to the `_test` logs
    pub event_log_test_mode: bool,

    /// Speech gateway; narration is only logged when unset
    pub narration_url: Option<String>,
    pub narration_api_key: Option<String>,
    pub audio_dir: PathBuf,
    /// Command used to play narration audio
    pub audio_player: String,

    /// Allowed client origins for CORS (comma-separated), any when unset
    pub client_origin: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns a variable's value
    /// if it is set
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let server_addr = match var("PORT") {
            Some(port) => format!("0.0.0.0:{}", port.trim()),
            None => var("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8765".to_string()),
        };

        let telemetry_source = var("TELEMETRY_SOURCE")
            .map(|raw| {
                TelemetrySource::parse(&raw).map_err(|_| ConfigError::Invalid {
                    name: "TELEMETRY_SOURCE",
                    value: raw,
                })
            })
            .transpose()?;

        Ok(Self {
            server_addr: server_addr
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidAddress(server_addr.clone()))?,

            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            run_mode: parse_or("RUN_MODE", var("RUN_MODE"), RunMode::default())?,

            tick_rate_hz: parse_or("TICK_RATE_HZ", var("TICK_RATE_HZ"), DEFAULT_TICK_RATE_HZ)?,
            violation_interval_ticks: parse_or(
                "VIOLATION_INTERVAL_TICKS",
                var("VIOLATION_INTERVAL_TICKS"),
                60,
            )?,
            initial_scene: parse_or("INITIAL_SCENE", var("INITIAL_SCENE"), Scenario::Highway)?,
            acquisition_interval: Duration::from_millis(
                parse_or("ACQUISITION_INTERVAL_MS", var("ACQUISITION_INTERVAL_MS"), 500u64)?.max(1),
            ),

            telemetry_source,

            event_log_dir: var("EVENT_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./error_data")),
            event_log_test_mode: parse_or("EVENT_LOG_TEST_MODE", var("EVENT_LOG_TEST_MODE"), false)?,

            narration_url: var("NARRATION_URL"),
            narration_api_key: var("NARRATION_API_KEY"),
            audio_dir: var("AUDIO_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./audio_feedback")),
            audio_player: var("AUDIO_PLAYER").unwrap_or_else(|| default_audio_player().to_string()),

            client_origin: var("CLIENT_ORIGIN"),
        })
    }

    /// Tick loop settings derived from this config
    pub fn simulation_settings(&self) -> SimulationSettings {
        SimulationSettings {
            tick_rate_hz: self.tick_rate_hz,
            violation_interval_ticks: self.violation_interval_ticks,
            test_mode: self.event_log_test_mode,
            initial_scene: self.initial_scene,
            ..Default::default()
        }
    }

    /// Acquisition loop settings derived from this config
    pub fn acquisition_settings(&self) -> AcquisitionSettings {
        AcquisitionSettings {
            scenario: self.initial_scene,
            interval: self.acquisition_interval,
            test_mode: self.event_log_test_mode,
            ..Default::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8765)),
            log_level: "info".to_string(),
            run_mode: RunMode::default(),
            tick_rate_hz: DEFAULT_TICK_RATE_HZ,
            violation_interval_ticks: 60,
            initial_scene: Scenario::Highway,
            acquisition_interval: Duration::from_millis(500),
            telemetry_source: None,
            event_log_dir: PathBuf::from("./error_data"),
            event_log_test_mode: false,
            narration_url: None,
            narration_api_key: None,
            audio_dir: PathBuf::from("./audio_feedback"),
            audio_player: default_audio_player().to_string(),
            client_origin: None,
        }
    }
}

/// What the binary runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Physics loop and WebSocket server
    #[default]
    Simulator,
    /// Rule checks straight from rig readings, no physics or clients
    Acquisition,
    /// Replay the canned samples into the test logs and exit
    SelfTest,
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simulator" => Ok(Self::Simulator),
            "acquisition" => Ok(Self::Acquisition),
            "self_test" | "acquisition_test" => Ok(Self::SelfTest),
            other => Err(other.to_string()),
        }
    }
}

pub fn default_audio_player() -> &'static str {
    if cfg!(target_os = "macos") {
        "afplay"
    } else {
        "mpg123"
    }
}

fn parse_or<T: FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address: {0:?}")]
    InvalidAddress(String),

    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}
