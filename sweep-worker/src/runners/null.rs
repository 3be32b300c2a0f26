use async_trait::async_trait;
use sweep_core::ExecutionError;
use tracing::info;

use super::{ModelRunner, RunContext};

/// Does nothing and succeeds; useful for exercising a deployment
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRunner;

#[async_trait]
impl ModelRunner for NullRunner {
    async fn run(&self, ctx: RunContext<'_>) -> Result<bool, ExecutionError> {
        info!(
            run_id = ctx.run_id,
            parameters = %ctx.parameters.to_json(),
            "Null runner invoked"
        );
        Ok(true)
    }
}
