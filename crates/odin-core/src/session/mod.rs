//! Flash sessions: the state record and the orchestrator that drives it.

mod orchestrator;
mod state;

pub use orchestrator::{CancelToken, FlashOrchestrator};
pub use state::{FlashSession, FlashStep, RebootOutcome, SessionState, StepOutcome, StepResult};
