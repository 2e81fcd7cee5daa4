//! Built-in pass-through executable.

use async_trait::async_trait;

use super::executable::{NodeContext, NodeExecutable, NodeResult};

/// Copies its inputs to its outputs unchanged; parameters win over inputs on
/// key collision. Useful as a wiring probe and as the default seed node in
/// demos and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityExecutable;

#[async_trait]
impl NodeExecutable for IdentityExecutable {
  async fn execute(&self, context: NodeContext) -> NodeResult {
    let mut outputs = context.inputs;
    for (key, value) in context.parameters {
      outputs.insert(key, value);
    }
    NodeResult::success(outputs)
  }
}
