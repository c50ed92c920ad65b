//! Scenario rule tables and the dispatcher that evaluates them
//!
//! Each scenario owns an ordered list of `(kind, predicate)` pairs tagged
//! with a dispatch mode. `FirstMatch` tables report only the most severe
//! concern per evaluation; `AllMatch` tables report every rule that fires.

use crate::sim::{Gear, Scenario};

use super::event::ViolationKind;
use super::sample::DrivingSample;

/// Below this speed the car counts as stationary for the handbrake trigger
const MOVING_SPEED: f32 = 0.1;

/// Rule limits. All of these are configuration, not contract.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub highway_speed_limit: f32,
    pub harsh_deceleration: f32,
    pub steering_danger: f32,
    pub lane_change_steering: f32,
    pub safe_following_distance: f32,
    pub intersection_speed_limit: f32,
    pub harsh_acceleration: f32,
    pub reverse_steering_danger: f32,
    pub corner_distance_sum: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            highway_speed_limit: 100.0,
            harsh_deceleration: 16.0,
            steering_danger: 29.0,
            lane_change_steering: 14.0,
            safe_following_distance: 10.0,
            intersection_speed_limit: 50.0,
            harsh_acceleration: 70.0,
            reverse_steering_danger: 40.0,
            corner_distance_sum: 12.0,
        }
    }
}

/// How a rule table is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Stop at the first rule that fires
    FirstMatch,
    /// Evaluate every rule independently
    AllMatch,
}

type Predicate = fn(&DrivingSample, &Thresholds) -> bool;

#[derive(Clone, Copy)]
pub struct Rule {
    pub kind: ViolationKind,
    pub check: Predicate,
}

impl Rule {
    const fn new(kind: ViolationKind, check: Predicate) -> Self {
        Self { kind, check }
    }
}

pub struct RuleSet {
    pub mode: DispatchMode,
    pub rules: &'static [Rule],
}

fn highway_overspeed(s: &DrivingSample, t: &Thresholds) -> bool {
    s.speed.abs() > t.highway_speed_limit
}

fn harsh_deceleration(s: &DrivingSample, t: &Thresholds) -> bool {
    s.brake > t.harsh_deceleration
}

fn poor_steering_control(s: &DrivingSample, t: &Thresholds) -> bool {
    s.steering_angle.abs() > t.steering_danger
}

fn lane_change_no_signal(s: &DrivingSample, t: &Thresholds) -> bool {
    !s.turn_signal.is_on() && s.steering_angle.abs() > t.lane_change_steering
}

fn unsafe_distance(s: &DrivingSample, t: &Thresholds) -> bool {
    s.front_distance.is_some_and(|d| d < t.safe_following_distance)
}

fn missing_signal(s: &DrivingSample, _: &Thresholds) -> bool {
    s.steering_change && !s.turn_signal.is_on()
}

fn intersection_overspeed(s: &DrivingSample, t: &Thresholds) -> bool {
    s.speed.abs() > t.intersection_speed_limit
}

fn harsh_acceleration(s: &DrivingSample, t: &Thresholds) -> bool {
    s.throttle > t.harsh_acceleration
}

fn handbrake_not_released(s: &DrivingSample, _: &Thresholds) -> bool {
    s.handbrake
}

fn poor_reverse_control(s: &DrivingSample, t: &Thresholds) -> bool {
    s.gear == Gear::Reverse && s.steering_angle.abs() > t.reverse_steering_danger
}

fn distance_sum_exceeded(s: &DrivingSample, t: &Thresholds) -> bool {
    s.corner_distances
        .is_some_and(|corners| corners.iter().sum::<f32>() > t.corner_distance_sum)
}

// Highway: ordered by severity
static HIGHWAY_RULES: [Rule; 5] = [
    Rule::new(ViolationKind::Overspeed, highway_overspeed),
    Rule::new(ViolationKind::HarshDeceleration, harsh_deceleration),
    Rule::new(ViolationKind::PoorSteeringControl, poor_steering_control),
    Rule::new(ViolationKind::LaneChangeNoSignal, lane_change_no_signal),
    Rule::new(ViolationKind::UnsafeDistance, unsafe_distance),
];

static INTERSECTION_RULES: [Rule; 3] = [
    Rule::new(ViolationKind::MissingSignal, missing_signal),
    Rule::new(ViolationKind::Overspeed, intersection_overspeed),
    Rule::new(ViolationKind::HarshAcceleration, harsh_acceleration),
];

static PARKING_RULES: [Rule; 3] = [
    Rule::new(ViolationKind::HandbrakeNotReleased, handbrake_not_released),
    Rule::new(ViolationKind::PoorReverseControl, poor_reverse_control),
    Rule::new(ViolationKind::DistanceSumExceeded, distance_sum_exceeded),
];

static HIGHWAY: RuleSet = RuleSet {
    mode: DispatchMode::FirstMatch,
    rules: &HIGHWAY_RULES,
};

static INTERSECTION: RuleSet = RuleSet {
    mode: DispatchMode::AllMatch,
    rules: &INTERSECTION_RULES,
};

static PARKING: RuleSet = RuleSet {
    mode: DispatchMode::AllMatch,
    rules: &PARKING_RULES,
};

pub fn rule_set(scenario: Scenario) -> &'static RuleSet {
    match scenario {
        Scenario::Highway => &HIGHWAY,
        Scenario::Intersection => &INTERSECTION,
        Scenario::Parking => &PARKING,
    }
}

/// Run a rule table against one sample
pub fn dispatch(set: &RuleSet, sample: &DrivingSample, thresholds: &Thresholds) -> Vec<ViolationKind> {
    let mut matched = set
        .rules
        .iter()
        .filter(|rule| (rule.check)(sample, thresholds))
        .map(|rule| rule.kind);

    match set.mode {
        DispatchMode::FirstMatch => matched.next().into_iter().collect(),
        DispatchMode::AllMatch => matched.collect(),
    }
}

/// Violations for `sample` under the rules of `scenario`
pub fn evaluate(
    scenario: Scenario,
    sample: &DrivingSample,
    thresholds: &Thresholds,
) -> Vec<ViolationKind> {
    dispatch(rule_set(scenario), sample, thresholds)
}

/// Result of one detector pass
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Detection {
    pub violations: Vec<ViolationKind>,
    /// Scenario the simulation should switch to as a side effect
    pub transition: Option<Scenario>,
}

/// Evaluate rules and work out scenario transitions. Pulling the handbrake
/// while moving means the driver is entering a parking space.
pub fn detect(scenario: Scenario, sample: &DrivingSample, thresholds: &Thresholds) -> Detection {
    let violations = evaluate(scenario, sample, thresholds);

    let transition = (scenario != Scenario::Parking
        && sample.handbrake
        && sample.speed.abs() > MOVING_SPEED)
        .then_some(Scenario::Parking);

    Detection {
        violations,
        transition,
    }
}
