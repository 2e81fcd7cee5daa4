//! Execution state store: the system of record for execution status,
//! per-node status, variables and checkpoints.

mod events;
mod state_store;
#[cfg(test)]
mod state_store_test;

pub use events::StoreEvent;
pub use state_store::ExecutionStore;
