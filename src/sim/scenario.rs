//! Driving scenarios

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Named driving context. Selects which violation rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    #[default]
    Highway,
    Intersection,
    /// Older clients still send `parking_lot`
    #[serde(alias = "parking_lot")]
    Parking,
}

impl Scenario {
    pub const ALL: [Scenario; 3] = [Self::Highway, Self::Intersection, Self::Parking];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Highway => "highway",
            Self::Intersection => "intersection",
            Self::Parking => "parking",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown scenario: {0}")]
pub struct UnknownScenario(pub String);

impl FromStr for Scenario {
    type Err = UnknownScenario;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        if name == "parking_lot" {
            return Ok(Self::Parking);
        }
        Self::ALL
            .into_iter()
            .find(|scene| scene.as_str() == name)
            .ok_or(UnknownScenario(name))
    }
}
