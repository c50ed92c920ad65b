//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::sim::{CarState, ControlInputs, Gear, PhysicsParams, Position, Scenario, TurnSignal};

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Switch driving scenario (resets the car)
    SetScene { scene: Scenario },

    /// Control input from the web interface
    ManualControl {
        #[serde(default)]
        controls: ManualControls,
    },

    /// Ask for an immediate state update
    RequestState,
}

/// Fields of a manual control message. Absent fields leave the
/// corresponding input untouched; a field that fails to parse is dropped
/// on its own without rejecting the rest of the message.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ManualControls {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub acceleration: Option<f32>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub deceleration: Option<f32>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub steering_angle: Option<f32>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub gear: Option<Gear>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub turn_signal: Option<TurnSignal>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub handbrake: Option<bool>,
}

/// Parse an optional field, logging and discarding values of the wrong
/// shape or with unknown codes
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Some(value) = Option::<serde_json::Value>::deserialize(deserializer)? else {
        return Ok(None);
    };
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(e) => {
            warn!(value = %value, error = %e, "Ignoring invalid control field");
            Ok(None)
        }
    }
}

impl From<ManualControls> for ControlInputs {
    fn from(c: ManualControls) -> Self {
        Self {
            acceleration: c.acceleration,
            deceleration: c.deceleration,
            steering_angle: c.steering_angle,
            gear: c.gear,
            turn_signal: c.turn_signal,
            handbrake: c.handbrake,
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Car state, sent every tick, on connect and on request
    StateUpdate { car: CarView, scene: Scenario },

    /// Scenario switched, car has been reset
    SceneChanged { scene: Scenario },
}

/// Car state as rendered by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarView {
    pub position: Position,
    pub speed: f32,
    pub direction: f32,
    pub gear: Gear,
    pub steering_angle: f32,
    pub acceleration_rate: f32,
    pub deceleration_rate: f32,
    pub car_length: f32,
    pub car_width: f32,
    pub turn_signal: TurnSignal,
}

impl CarView {
    pub fn new(car: &CarState, params: &PhysicsParams) -> Self {
        Self {
            position: car.position,
            speed: car.speed,
            direction: car.direction,
            gear: car.gear,
            steering_angle: car.steering_angle,
            acceleration_rate: car.acceleration_rate,
            deceleration_rate: car.deceleration_rate,
            car_length: params.car_length,
            car_width: params.car_width,
            turn_signal: car.turn_signal,
        }
    }
}
