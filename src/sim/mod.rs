//! Car physics, scenarios and the authoritative tick loop

pub mod car;
pub mod physics;
pub mod scenario;
pub mod simulation;
pub mod snapshot;

pub use car::{CarState, Gear, Position, TurnSignal};
pub use physics::{ControlInputs, PhysicsEngine, PhysicsParams};
pub use scenario::Scenario;
pub use simulation::{SimCommand, Simulation, SimulationHandle, SimulationSettings};
pub use snapshot::StateSnapshot;
