//! Session workflow driver: phase sequencing, the correction loop with its
//! no-progress guard, and the user-facing decision points.

pub mod correction;
pub mod dispatch;
pub mod error;
pub mod interaction;
pub mod orchestrator;

pub use correction::decision_options;
pub use error::OrchestratorError;
pub use interaction::{Decision, DecisionKind, Notice, NoticeKind, UserChannel};
pub use orchestrator::Orchestrator;
