//! Background reader for the hardware link and the shared telemetry record

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::frame::{FrameDecoder, RawFrame};
use super::TelemetryError;

const READ_CHUNK: usize = 256;

/// Latest complete frame plus how many frames have been seen
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TelemetryRecord {
    pub frame: RawFrame,
    /// 0 until the first frame arrives
    pub sequence: u64,
}

/// Telemetry shared between the reader task and the simulation loop.
/// The record is only ever replaced whole, under its own lock.
#[derive(Debug, Default)]
pub struct SharedTelemetry {
    record: Mutex<TelemetryRecord>,
    connected: AtomicBool,
}

impl SharedTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, frame: RawFrame) {
        let mut record = self.record.lock();
        record.frame = frame;
        record.sequence += 1;
    }

    /// Copy of the current record
    pub fn snapshot(&self) -> TelemetryRecord {
        *self.record.lock()
    }

    /// Latest record, or `None` before the first frame
    pub fn latest(&self) -> Option<TelemetryRecord> {
        let record = self.snapshot();
        (record.sequence > 0).then_some(record)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }
}

/// Decode frames from `reader` into `shared` until the link closes.
/// Returns the number of frames decoded. The record is marked disconnected
/// on exit either way.
pub async fn read_frames<R>(mut reader: R, shared: &SharedTelemetry) -> Result<u64, TelemetryError>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut frames = 0u64;
    shared.set_connected(true);

    let result = loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break Ok(frames),
            Ok(n) => n,
            Err(e) => break Err(TelemetryError::Read(e)),
        };

        decoder.extend(&chunk[..n]);
        while let Some(frame) = decoder.next_frame() {
            shared.store(frame);
            frames += 1;
        }
    };

    shared.set_connected(false);

    if decoder.pending() > 0 {
        debug!(bytes = decoder.pending(), "Dropping incomplete trailing frame");
    }
    if decoder.discarded() > 0 {
        debug!(bytes = decoder.discarded(), "Discarded bytes while resyncing");
    }

    result
}

/// Spawn the reader on its own task
pub fn spawn_reader<R>(reader: R, shared: Arc<SharedTelemetry>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        info!("Telemetry reader started");
        match read_frames(reader, &shared).await {
            Ok(frames) => warn!(frames, "Telemetry link closed"),
            Err(e) => error!(error = %e, "Telemetry link failed"),
        }
    })
}
