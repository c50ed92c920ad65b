//! Input records for the violation detector

use crate::sim::{CarState, Gear, Scenario, TurnSignal};

/// Steering must move more than this many degrees between two samples to
/// count as a steering change.
pub const STEERING_CHANGE_DEGREES: f32 = 5.0;

/// Everything the rules look at for one evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrivingSample {
    pub scenario: Scenario,
    pub throttle: f32,
    pub brake: f32,
    pub steering_angle: f32,
    /// Steering moved noticeably since the previous sample
    pub steering_change: bool,
    pub turn_signal: TurnSignal,
    pub handbrake: bool,
    pub speed: f32,
    /// Range to the vehicle ahead, when a sensor provides it
    pub front_distance: Option<f32>,
    pub gear: Gear,
    /// Distances from each car corner to the bay lines, parking only
    pub corner_distances: Option<[f32; 4]>,
    /// Routes the event to the test log instead of the production log
    pub test_mode: bool,
}

impl DrivingSample {
    /// A neutral sample: stationary, no inputs, no sensors
    pub fn idle(scenario: Scenario) -> Self {
        Self {
            scenario,
            throttle: 0.0,
            brake: 0.0,
            steering_angle: 0.0,
            steering_change: false,
            turn_signal: TurnSignal::None,
            handbrake: false,
            speed: 0.0,
            front_distance: None,
            gear: Gear::Drive,
            corner_distances: None,
            test_mode: false,
        }
    }

    /// Direction of travel as written to the log
    pub fn mode(&self) -> &'static str {
        if self.gear == Gear::Reverse {
            "reverse"
        } else {
            "forward"
        }
    }
}

/// Builds samples from successive car states, remembering the previous
/// steering angle to derive `steering_change`.
#[derive(Debug, Default)]
pub struct SampleTracker {
    previous_steering: Option<f32>,
}

impl SampleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `angle` moved by more than `STEERING_CHANGE_DEGREES` since
    /// the previous call. The first call never counts as a change.
    pub fn steering_changed(&mut self, angle: f32) -> bool {
        let changed = self
            .previous_steering
            .map(|prev| (angle - prev).abs() > STEERING_CHANGE_DEGREES)
            .unwrap_or(false);
        self.previous_steering = Some(angle);
        changed
    }

    pub fn sample(&mut self, scenario: Scenario, car: &CarState, test_mode: bool) -> DrivingSample {
        let steering_change = self.steering_changed(car.steering_angle);

        DrivingSample {
            scenario,
            throttle: car.acceleration_rate,
            brake: car.deceleration_rate,
            steering_angle: car.steering_angle,
            steering_change,
            turn_signal: car.turn_signal,
            handbrake: car.handbrake,
            speed: car.speed,
            front_distance: None,
            gear: car.gear,
            corner_distances: None,
            test_mode,
        }
    }

    /// Forget history, e.g. after the scene is reset
    pub fn reset(&mut self) {
        self.previous_steering = None;
    }
}
