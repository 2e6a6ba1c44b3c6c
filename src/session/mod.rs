pub mod controller;
pub mod state;

pub use controller::{Clock, SessionController};
pub use state::{ControllerSnapshot, ControllerState, SessionPhase};
