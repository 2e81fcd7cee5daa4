//! Run a three-node composite end to end and print the report.

use std::sync::Arc;

use serde_json::json;

use conductor::executor::{ExecutableRegistry, ExecuteOptions, IdentityExecutable, Orchestrator};
use conductor::store::ExecutionStore;
use conductor::types::{Composite, Edge, NodeSpec};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
  let mut composite = Composite::new("demo", "Simple workflow");
  composite.nodes = vec![
    NodeSpec::new("greet", "identity").with_parameter("message", json!("hello")),
    NodeSpec::new("shout", "identity").with_parameter("volume", json!("loud")),
    NodeSpec::new("done", "identity"),
  ];
  composite.edges = vec![
    Edge::new("greet", "message", "shout", "text"),
    Edge::new("shout", "text", "done", "in"),
  ];

  let mut registry = ExecutableRegistry::new();
  registry.register("identity", Arc::new(IdentityExecutable));

  let engine = Orchestrator::new(Arc::new(ExecutionStore::new()), Arc::new(registry));
  let report = engine.execute(&composite, ExecuteOptions::default()).await?;

  println!("Execution {} finished.", report.execution_id);
  println!("  Success: {}", report.success);
  println!("  Nodes executed: {}", report.metrics.nodes_executed);
  for (key, value) in &report.outputs {
    println!("  {key} = {value}");
  }
  Ok(())
}
