use async_trait::async_trait;
use bpcore::{NodeError, ProcessContext, ProcessHandler, ProcessMetadata, Value};

/// Succeeds immediately, returning its `result` parameter or null
pub struct NoopProcess;

#[async_trait]
impl ProcessHandler for NoopProcess {
    fn process_id(&self) -> &str {
        "control.noop"
    }

    async fn execute(&self, ctx: ProcessContext) -> Result<Value, NodeError> {
        Ok(ctx.parameter_or("result", Value::Null))
    }

    fn metadata(&self) -> ProcessMetadata {
        ProcessMetadata {
            description: "Does nothing and succeeds".to_string(),
            category: "control".to_string(),
        }
    }
}

/// Always fails with its `message` parameter
pub struct FailProcess;

#[async_trait]
impl ProcessHandler for FailProcess {
    fn process_id(&self) -> &str {
        "control.fail"
    }

    async fn execute(&self, ctx: ProcessContext) -> Result<Value, NodeError> {
        let message = ctx
            .parameter("message")
            .and_then(|v| v.as_str())
            .unwrap_or("failed on purpose");
        Err(NodeError::ExecutionFailed(message.to_string()))
    }

    fn metadata(&self) -> ProcessMetadata {
        ProcessMetadata {
            description: "Fails with the configured message".to_string(),
            category: "control".to_string(),
        }
    }
}
