//! Violation kinds and the events recorded for them

use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::sim::Scenario;

use super::rules::Thresholds;
use super::sample::DrivingSample;

/// Tag for a matched driving rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Overspeed,
    HarshDeceleration,
    PoorSteeringControl,
    LaneChangeNoSignal,
    UnsafeDistance,
    MissingSignal,
    HarshAcceleration,
    HandbrakeNotReleased,
    PoorReverseControl,
    DistanceSumExceeded,
}

impl ViolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Overspeed => "overspeed",
            Self::HarshDeceleration => "harsh_deceleration",
            Self::PoorSteeringControl => "poor_steering_control",
            Self::LaneChangeNoSignal => "lane_change_no_signal",
            Self::UnsafeDistance => "unsafe_distance",
            Self::MissingSignal => "missing_signal",
            Self::HarshAcceleration => "harsh_acceleration",
            Self::HandbrakeNotReleased => "handbrake_not_released",
            Self::PoorReverseControl => "poor_reverse_control",
            Self::DistanceSumExceeded => "distance_sum_exceeded",
        }
    }

    /// Driver-facing text handed to the narration service
    pub fn prompt(self) -> &'static str {
        match self {
            Self::Overspeed => {
                "You are currently exceeding the speed limit. Please slow down to a safe speed."
            }
            Self::HarshDeceleration => {
                "You braked too hard. Press the brake gradually to slow down smoothly."
            }
            Self::PoorSteeringControl => {
                "You are turning the steering wheel too sharply. Make small, gentle corrections."
            }
            Self::LaneChangeNoSignal => {
                "You changed lanes without signaling. Next time, turn on your indicator well before you move."
            }
            Self::UnsafeDistance => {
                "You are following the vehicle ahead too closely. Ease off the accelerator or brake gently to maintain at least a two-second gap."
            }
            Self::MissingSignal => {
                "You are about to turn at the intersection. Please activate your turn signal to alert other drivers and pedestrians."
            }
            Self::HarshAcceleration => {
                "Your acceleration was too aggressive, increasing fuel consumption and traction loss risk. Apply the throttle smoothly."
            }
            Self::HandbrakeNotReleased => {
                "The parking brake is still engaged. Release it completely before driving to avoid brake damage."
            }
            Self::PoorReverseControl => {
                "Your steering angle is too sharp while reversing. Make gentle adjustments to keep the vehicle under control."
            }
            Self::DistanceSumExceeded => {
                "The vehicle is not centered in the parking bay, the combined corner distances are too large. Realign and park within the lines."
            }
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A matched rule together with the data it matched on. Never mutated
/// after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ViolationEvent {
    pub timestamp: DateTime<Local>,
    pub scenario: Scenario,
    pub kind: ViolationKind,
    pub sample: DrivingSample,
    pub thresholds: Thresholds,
}

impl ViolationEvent {
    /// Event for `kind` matched on `sample`, under the sample's scenario
    pub fn new(kind: ViolationKind, sample: DrivingSample, thresholds: Thresholds) -> Self {
        Self {
            timestamp: Local::now(),
            scenario: sample.scenario,
            kind,
            sample,
            thresholds,
        }
    }

    pub fn narrated_prompt(&self) -> &'static str {
        self.kind.prompt()
    }
}
