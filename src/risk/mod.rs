// Pre-trade market condition checks
pub mod gates;

pub use gates::{GateTrip, OpenGates};
