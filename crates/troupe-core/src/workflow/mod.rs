pub mod coordinator;
pub mod executor;
pub mod planner;
pub mod retry;
pub mod schema;

pub use coordinator::{WorkflowCoordinator, WorkflowOutcome};
pub use executor::StepExecutor;
pub use planner::WorkflowPlanner;
pub use retry::{DropLowestPriority, ExecutionState, NarrowingStrategy, RetryFallbackController};
pub use schema::{
    FallbackPolicy, RuleKind, StepResult, ValidationRule, WorkflowData, WorkflowDefinition,
    WorkflowStep, WorkflowType,
};
