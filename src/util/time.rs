//! Time utilities for the simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Default simulation rate
pub const DEFAULT_TICK_RATE_HZ: u32 = 60;

/// Longest step the physics will take after a stall (seconds)
pub const MAX_TICK_DELTA: f32 = 0.25;

/// Wall-clock duration of one tick at `tick_rate_hz`
pub fn tick_duration(tick_rate_hz: u32) -> Duration {
    Duration::from_micros(1_000_000 / u64::from(tick_rate_hz.max(1)))
}

/// Measures the real time elapsed between ticks
#[derive(Debug, Clone)]
pub struct TickClock {
    last: Instant,
}

impl TickClock {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Seconds since the previous call, capped at `MAX_TICK_DELTA`
    pub fn delta(&mut self) -> f32 {
        let now = Instant::now();
        let dt = now.duration_since(self.last).as_secs_f32();
        self.last = now;
        dt.min(MAX_TICK_DELTA)
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new()
    }
}
