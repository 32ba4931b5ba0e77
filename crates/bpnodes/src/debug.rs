use async_trait::async_trait;
use bpcore::{NodeError, ProcessContext, ProcessHandler, ProcessMetadata, Value};
use std::collections::HashMap;

/// Logs a message and hands it back as the node result
pub struct DebugProcess;

#[async_trait]
impl ProcessHandler for DebugProcess {
    fn process_id(&self) -> &str {
        "debug.log"
    }

    async fn execute(&self, ctx: ProcessContext) -> Result<Value, NodeError> {
        let message = ctx
            .parameter("message")
            .and_then(|v| v.as_str())
            .unwrap_or("(no message)")
            .to_string();

        tracing::info!(node = %ctx.node_id, "DEBUG: {}", message);
        for (key, value) in &ctx.variables {
            tracing::debug!(node = %ctx.node_id, "  {}: {:?}", key, value);
        }

        let mut output = HashMap::new();
        output.insert("message".to_string(), Value::String(message));
        output.insert("node_id".to_string(), Value::String(ctx.node_id));
        Ok(Value::Object(output))
    }

    fn metadata(&self) -> ProcessMetadata {
        ProcessMetadata {
            description: "Logs a message and the run variables".to_string(),
            category: "debug".to_string(),
        }
    }
}
