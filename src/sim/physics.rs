//! Car physics and control input handling

use tracing::{debug, warn};

use super::car::{CarState, Gear, TurnSignal};

/// Largest steering deflection in either direction (degrees)
pub const MAX_STEERING_ANGLE: f32 = 45.0;

/// Physics constants for the simulated car
#[derive(Debug, Clone, Copy)]
pub struct PhysicsParams {
    /// Maximum speed in either direction
    pub max_speed: f32,
    /// Exponential friction applied every tick
    pub friction: f32,
    /// Turn sensitivity
    pub turning_factor: f32,
    /// Speed multiplier applied when switching between Drive and Reverse
    pub gear_change_stop_factor: f32,
    /// Coasting below this speed stops the car outright
    pub coast_stop_speed: f32,
    /// Below this speed the car neither turns nor keeps residual speed
    pub motion_threshold: f32,
    /// Car length, reported to clients for rendering
    pub car_length: f32,
    /// Car width, reported to clients for rendering
    pub car_width: f32,
}

impl Default for PhysicsParams {
    fn default() -> Self {
        Self {
            max_speed: 250.0,
            friction: 0.99,
            turning_factor: 3.0,
            gear_change_stop_factor: 0.5,
            coast_stop_speed: 1.0,
            motion_threshold: 0.1,
            car_length: 80.0,
            car_width: 30.0,
        }
    }
}

/// A partial set of commanded inputs. Manual control messages and hardware
/// telemetry are both expressed as this and go through the same setters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControlInputs {
    pub acceleration: Option<f32>,
    pub deceleration: Option<f32>,
    pub steering_angle: Option<f32>,
    pub gear: Option<Gear>,
    pub turn_signal: Option<TurnSignal>,
    pub handbrake: Option<bool>,
}

impl ControlInputs {
    pub fn apply_to(&self, engine: &mut PhysicsEngine) {
        if let Some(acceleration) = self.acceleration {
            engine.set_acceleration(acceleration);
        }
        if let Some(deceleration) = self.deceleration {
            engine.set_deceleration(deceleration);
        }
        if let Some(angle) = self.steering_angle {
            engine.set_steering(angle);
        }
        if let Some(gear) = self.gear {
            engine.set_gear(gear);
        }
        if let Some(signal) = self.turn_signal {
            engine.set_turn_signal(signal);
        }
        if let Some(handbrake) = self.handbrake {
            engine.set_handbrake(handbrake);
        }
    }
}

/// Integrates control inputs into car state
#[derive(Debug, Clone)]
pub struct PhysicsEngine {
    state: CarState,
    params: PhysicsParams,
}

impl PhysicsEngine {
    pub fn new(params: PhysicsParams) -> Self {
        Self {
            state: CarState::default(),
            params,
        }
    }

    pub fn params(&self) -> &PhysicsParams {
        &self.params
    }

    /// Immutable copy of the current state
    pub fn state(&self) -> CarState {
        self.state
    }

    /// Put the car back at the origin, parked, with all inputs released
    pub fn reset(&mut self) {
        self.state = CarState::default();
    }

    pub fn set_acceleration(&mut self, rate: f32) {
        if !rate.is_finite() {
            warn!(rate, "Ignoring non-finite acceleration");
            return;
        }
        self.state.acceleration_rate = rate.max(0.0);
        debug!(rate = self.state.acceleration_rate, "Acceleration set");
    }

    pub fn set_deceleration(&mut self, rate: f32) {
        if !rate.is_finite() {
            warn!(rate, "Ignoring non-finite deceleration");
            return;
        }
        self.state.deceleration_rate = rate.max(0.0);
        debug!(rate = self.state.deceleration_rate, "Deceleration set");
    }

    pub fn set_steering(&mut self, angle: f32) {
        if angle.is_nan() {
            warn!(angle, "Ignoring NaN steering angle");
            return;
        }
        // Infinities clamp to full lock
        self.state.steering_angle = angle.clamp(-MAX_STEERING_ANGLE, MAX_STEERING_ANGLE);
        debug!(angle = self.state.steering_angle, "Steering set");
    }

    pub fn set_gear(&mut self, gear: Gear) {
        let old = self.state.gear;
        if old == gear {
            return;
        }
        self.state.gear = gear;

        match (old, gear) {
            (_, Gear::Park) => self.state.speed = 0.0,
            // Going straight from D to R (or back) bleeds off speed first
            (Gear::Drive, Gear::Reverse) | (Gear::Reverse, Gear::Drive) => {
                self.state.speed *= self.params.gear_change_stop_factor;
            }
            _ => {}
        }

        debug!(from = %old, to = %gear, "Gear changed");
    }

    pub fn set_handbrake(&mut self, engaged: bool) {
        if self.state.handbrake != engaged {
            debug!(engaged, "Handbrake changed");
        }
        self.state.handbrake = engaged;
    }

    pub fn set_turn_signal(&mut self, signal: TurnSignal) {
        self.state.turn_signal = signal;
    }

    /// Advance the simulation by `dt` seconds
    pub fn update(&mut self, dt: f32) {
        if !dt.is_finite() || dt < 0.0 {
            warn!(dt, "Skipping physics update with invalid dt");
            return;
        }

        let p = self.params;
        let s = &mut self.state;

        match s.gear {
            Gear::Park => s.speed = 0.0,
            Gear::Drive => {
                s.speed = s.speed.max(0.0);
                if s.acceleration_rate > 0.0 {
                    s.speed += s.acceleration_rate * dt;
                } else if s.deceleration_rate > 0.0 {
                    s.speed = (s.speed - s.deceleration_rate * dt).max(0.0);
                }
                if s.acceleration_rate <= 0.0 && s.speed < p.coast_stop_speed {
                    s.speed = 0.0;
                }
            }
            Gear::Reverse => {
                s.speed = s.speed.min(0.0);
                if s.acceleration_rate > 0.0 {
                    s.speed -= s.acceleration_rate * dt;
                } else if s.deceleration_rate > 0.0 {
                    s.speed = (s.speed + s.deceleration_rate * dt).min(0.0);
                }
                if s.acceleration_rate <= 0.0 && s.speed > -p.coast_stop_speed {
                    s.speed = 0.0;
                }
            }
        }

        s.speed *= p.friction;
        s.speed = s.speed.clamp(-p.max_speed, p.max_speed);

        // Snap residual creep to rest, after friction and clamping
        if s.speed.abs() < p.motion_threshold {
            s.speed = 0.0;
        }

        if s.speed.abs() > p.motion_threshold {
            let mut turn = s.steering_angle * p.turning_factor * (s.speed.abs() / p.max_speed) * dt;
            // Steering feels mirrored when backing up
            if s.gear == Gear::Reverse {
                turn = -turn;
            }
            s.direction = normalize_degrees(s.direction + turn);
        }

        let heading = s.direction.to_radians();
        s.position.x += heading.sin() * s.speed * dt;
        s.position.y -= heading.cos() * s.speed * dt;
    }
}

impl Default for PhysicsEngine {
    fn default() -> Self {
        Self::new(PhysicsParams::default())
    }
}

/// Wrap an angle in degrees into (-180, 180]
pub fn normalize_degrees(degrees: f32) -> f32 {
    let wrapped = (degrees + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped <= -180.0 {
        wrapped + 360.0
    } else {
        wrapped
    }
}
