use async_trait::async_trait;
use bpcore::{NodeError, ProcessContext, ProcessHandler, ProcessMetadata, Value};
use tokio::time::{sleep, Duration};

/// Default delay when `delay_ms` is not configured
const DEFAULT_DELAY_MS: u64 = 1000;

/// Delay execution for a configured duration
pub struct DelayProcess;

#[async_trait]
impl ProcessHandler for DelayProcess {
    fn process_id(&self) -> &str {
        "time.delay"
    }

    async fn execute(&self, ctx: ProcessContext) -> Result<Value, NodeError> {
        let delay_ms = match ctx.parameter("delay_ms") {
            Some(value) => value.as_u64().ok_or_else(|| {
                NodeError::Configuration(format!(
                    "delay_ms must be a non-negative whole number, got {:?}",
                    value
                ))
            })?,
            None => DEFAULT_DELAY_MS,
        };

        tracing::debug!(node = %ctx.node_id, "Delaying for {}ms", delay_ms);
        sleep(Duration::from_millis(delay_ms)).await;

        Ok(Value::Number(delay_ms as f64))
    }

    fn metadata(&self) -> ProcessMetadata {
        ProcessMetadata {
            description: "Delay execution for delay_ms milliseconds".to_string(),
            category: "time".to_string(),
        }
    }
}
