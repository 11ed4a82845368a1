pub mod hub;
pub mod orchestrator;
pub mod server;

pub use hub::ObserverHub;
pub use orchestrator::{PipelineDelays, PipelineOutcome, RelayOrchestrator, Stage, Submission};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
