//! Node execution orchestration: the executable contract, composite
//! validation, input gathering and the level-by-level run loop.

mod builtin;
mod executable;
mod inputs;
mod orchestrator;
mod validate;

pub use builtin::IdentityExecutable;
pub use executable::{ExecutableRegistry, NodeContext, NodeExecutable, NodeResult, ResourceLimits};
pub use inputs::gather_node_inputs;
pub use orchestrator::{ExecuteOptions, ExecutionMetrics, ExecutionReport, Orchestrator};
pub use validate::validate_composite;
