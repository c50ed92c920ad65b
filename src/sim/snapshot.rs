//! Published simulation state and evaluation cadence

use crate::ws::protocol::{CarView, ServerMsg};

use super::{CarState, PhysicsParams, Scenario};

/// Immutable copy of the simulation after a tick. Connection handlers only
/// ever read these, never the live engine.
#[derive(Debug, Clone, Copy)]
pub struct StateSnapshot {
    pub tick: u64,
    pub scene: Scenario,
    pub car: CarState,
    pub params: PhysicsParams,
}

impl StateSnapshot {
    pub fn new(tick: u64, scene: Scenario, car: CarState, params: PhysicsParams) -> Self {
        Self {
            tick,
            scene,
            car,
            params,
        }
    }

    /// State as sent to clients
    pub fn to_message(&self) -> ServerMsg {
        ServerMsg::StateUpdate {
            car: CarView::new(&self.car, &self.params),
            scene: self.scene,
        }
    }
}

/// Counts ticks between violation checks
#[derive(Debug, Clone)]
pub struct EvaluationCadence {
    ticks_since_check: u32,
    interval: u32,
}

impl EvaluationCadence {
    pub fn new(interval: u32) -> Self {
        Self {
            ticks_since_check: 0,
            interval: interval.max(1),
        }
    }

    /// Advance one tick; true when a check is due
    pub fn should_evaluate(&mut self) -> bool {
        self.ticks_since_check += 1;
        if self.ticks_since_check >= self.interval {
            self.ticks_since_check = 0;
            true
        } else {
            false
        }
    }

    /// Start counting from zero again, e.g. after a scene reset
    pub fn reset(&mut self) {
        self.ticks_since_check = 0;
    }
}
