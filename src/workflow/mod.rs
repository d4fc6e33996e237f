pub mod engine;
pub mod failures;
pub mod types;

pub use engine::{EngineSettings, WorkflowEngine};
pub use failures::{FailureRecord, FailureTracker};
pub use types::{RunOptions, RunReport, RunStatus, StepResult, StepStatus};
