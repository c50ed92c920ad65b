//! Driving-safety violation detection

pub mod event;
pub mod rules;
pub mod sample;

pub use event::{ViolationEvent, ViolationKind};
pub use rules::{detect, Thresholds};
pub use sample::{DrivingSample, SampleTracker};
