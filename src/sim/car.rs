//! Car state and control enums

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transmission position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Gear {
    #[default]
    #[serde(rename = "P")]
    Park,
    #[serde(rename = "D")]
    Drive,
    #[serde(rename = "R")]
    Reverse,
}

impl Gear {
    /// Decode a single-character gear code as sent by the rig
    pub fn from_code(code: u8) -> Option<Self> {
        match code.to_ascii_uppercase() {
            b'P' => Some(Self::Park),
            b'D' => Some(Self::Drive),
            b'R' => Some(Self::Reverse),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Park => "P",
            Self::Drive => "D",
            Self::Reverse => "R",
        }
    }
}

impl fmt::Display for Gear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Turn indicator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TurnSignal {
    #[default]
    #[serde(rename = "N")]
    None,
    #[serde(rename = "L")]
    Left,
    #[serde(rename = "R")]
    Right,
}

impl TurnSignal {
    pub fn from_code(code: u8) -> Option<Self> {
        match code.to_ascii_uppercase() {
            b'N' => Some(Self::None),
            b'L' => Some(Self::Left),
            b'R' => Some(Self::Right),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "N",
            Self::Left => "L",
            Self::Right => "R",
        }
    }

    pub fn is_on(self) -> bool {
        self != Self::None
    }
}

impl fmt::Display for TurnSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// World offset of the car. The car is drawn fixed on screen and the
/// world scrolls underneath by this amount.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// Authoritative car state (owned by the simulation task)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CarState {
    pub position: Position,
    /// Signed speed in world units per second
    pub speed: f32,
    /// Heading in degrees, 0 is up, 90 is right. Always in (-180, 180].
    pub direction: f32,
    pub gear: Gear,
    /// Steering wheel angle in degrees, clamped to [-45, 45]
    pub steering_angle: f32,
    pub acceleration_rate: f32,
    pub deceleration_rate: f32,
    pub handbrake: bool,
    pub turn_signal: TurnSignal,
}
