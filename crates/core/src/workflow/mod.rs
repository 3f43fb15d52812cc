pub mod engine;
pub mod sweep;

pub use engine::{InitiatedWorkflow, Submission, WorkflowEngine, WorkflowError, WorkflowTransition};
pub use sweep::{InMemoryOrgDirectory, OrgDirectory, SweepAction, SweepPolicy, SweepReport};
