pub mod engine;
pub mod error;
pub mod simulated;

pub use engine::{EvaluationOutcome, KeyMaterialInfo, SealEngine};
pub use error::EngineError;
pub use simulated::{EngineConfig, SimulatedEngine};
