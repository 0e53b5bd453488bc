pub mod guard;
pub mod orchestrator;

pub use orchestrator::{ActivationDeps, InitializeOutcome, SessionOrchestrator};
