//! Hardware telemetry ingestion

pub mod frame;
pub mod ingest;
pub mod scaling;

use std::path::PathBuf;
use std::pin::Pin;

use tokio::io::AsyncRead;
use tokio::net::TcpStream;

pub use frame::RawFrame;
pub use ingest::{spawn_reader, SharedTelemetry};
pub use scaling::TelemetryScaling;

pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// Where control frames come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetrySource {
    /// Serial-to-TCP bridge, written as `tcp://host:port`
    Tcp(String),
    /// Serial device node or capture file
    Device(PathBuf),
}

impl TelemetrySource {
    pub fn parse(value: &str) -> Result<Self, TelemetryError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(TelemetryError::InvalidSource(value.to_string()));
        }
        match value.strip_prefix("tcp://") {
            Some("") => Err(TelemetryError::InvalidSource(value.to_string())),
            Some(addr) => Ok(Self::Tcp(addr.to_string())),
            None => Ok(Self::Device(PathBuf::from(value))),
        }
    }

    pub async fn open(&self) -> Result<BoxedReader, TelemetryError> {
        match self {
            Self::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await.map_err(TelemetryError::Open)?;
                Ok(Box::pin(stream))
            }
            Self::Device(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(TelemetryError::Open)?;
                Ok(Box::pin(file))
            }
        }
    }
}

impl std::fmt::Display for TelemetrySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{}", addr),
            Self::Device(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Telemetry errors
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Invalid telemetry source: {0:?}")]
    InvalidSource(String),

    #[error("Failed to open telemetry source: {0}")]
    Open(#[source] std::io::Error),

    #[error("Telemetry read failed: {0}")]
    Read(#[source] std::io::Error),
}
