//! Dependency-graph scheduler: level-batched topological order and cycle
//! detection over a composite's nodes and edges.

mod cycles;
mod levels;

pub use cycles::has_circular_dependencies;
pub use levels::{ExecutionOrder, compute_execution_order};
