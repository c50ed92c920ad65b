//! Raw rig units to physics inputs

use crate::sim::ControlInputs;

use super::ingest::TelemetryRecord;

/// Conversion from rig readings to engine setter values. The pedals read
/// high at rest and drop as they are pressed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryScaling {
    pub accel_rest: f32,
    pub accel_divisor: f32,
    pub decel_rest: f32,
    pub decel_divisor: f32,
    pub steering_gain: f32,
}

impl Default for TelemetryScaling {
    fn default() -> Self {
        Self {
            accel_rest: 700.0,
            accel_divisor: 4.0,
            decel_rest: 400.0,
            decel_divisor: 15.0,
            steering_gain: 3.0,
        }
    }
}

impl TelemetryScaling {
    pub fn to_controls(&self, record: &TelemetryRecord) -> ControlInputs {
        let frame = &record.frame;
        ControlInputs {
            acceleration: Some(pedal(frame.acceleration, self.accel_rest, self.accel_divisor)),
            deceleration: Some(pedal(frame.deceleration, self.decel_rest, self.decel_divisor)),
            steering_angle: Some(frame.steering as f32 * self.steering_gain),
            gear: frame.gear,
            turn_signal: frame.turn_signal,
            handbrake: Some(frame.handbrake),
        }
    }
}

fn pedal(raw: f32, rest: f32, divisor: f32) -> f32 {
    if !raw.is_finite() || divisor <= 0.0 {
        return 0.0;
    }
    ((rest - raw).max(0.0) / divisor).trunc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Gear, TurnSignal};
    use crate::telemetry::RawFrame;

    fn record(frame: RawFrame) -> TelemetryRecord {
        TelemetryRecord { frame, sequence: 1 }
    }

    #[test]
    fn pedals_are_inverted_and_scaled() {
        let controls = TelemetryScaling::default().to_controls(&record(RawFrame {
            acceleration: 300.0,
            deceleration: 100.0,
            steering: 5,
            handbrake: false,
            gear: Some(Gear::Drive),
            turn_signal: Some(TurnSignal::Left),
        }));

        assert_eq!(controls.acceleration, Some(100.0));
        assert_eq!(controls.deceleration, Some(20.0));
        assert_eq!(controls.steering_angle, Some(15.0));
        assert_eq!(controls.gear, Some(Gear::Drive));
        assert_eq!(controls.turn_signal, Some(TurnSignal::Left));
        assert_eq!(controls.handbrake, Some(false));
    }

    #[test]
    fn released_pedals_read_zero() {
        let controls = TelemetryScaling::default().to_controls(&record(RawFrame {
            acceleration: 800.0,
            deceleration: 450.0,
            ..Default::default()
        }));
        assert_eq!(controls.acceleration, Some(0.0));
        assert_eq!(controls.deceleration, Some(0.0));
    }

    #[test]
    fn pedal_values_are_truncated() {
        // (700 - 689) / 4 = 2.75
        let controls = TelemetryScaling::default().to_controls(&record(RawFrame {
            acceleration: 689.0,
            ..Default::default()
        }));
        assert_eq!(controls.acceleration, Some(2.0));
    }

    #[test]
    fn unknown_gear_is_not_applied() {
        let controls = TelemetryScaling::default().to_controls(&record(RawFrame::default()));
        assert_eq!(controls.gear, None);
    }
}
