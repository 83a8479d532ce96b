pub mod error;
pub mod pools;
pub mod params;
pub mod solver;
pub mod pulse;
pub mod sim;

pub use error::SimError;
pub use params::{Scanner, SimParams};
pub use pools::{CestPool, Lineshape, MtPool, WaterPool};
pub use sim::BmcSim;
pub use solver::BlochSolver;
