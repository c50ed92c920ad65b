//! Server wiring and lifecycle

pub mod server;
pub mod state;

pub use server::SimulationServer;
pub use state::AppState;
