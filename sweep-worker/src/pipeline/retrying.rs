use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use sweep_core::{CopyError, Run};
use tracing::{error, info, warn};

use super::{CopyOutcome, CopyStage, Next};

/// Upper bound on any single backoff wait
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// How often and how patiently to retry a failed copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_backoff,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Wait after failed attempt `attempt` (zero-based): `initial * 2^attempt`, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_backoff)
    }
}

/// Retries the rest of the chain with exponential backoff
///
/// The wait between attempts cannot be cancelled.
pub struct RetryingStage {
    policy: RetryPolicy,
}

impl RetryingStage {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl CopyStage for RetryingStage {
    async fn process(
        &self,
        run: &Run,
        source: &Path,
        success: bool,
        next: Next<'_>,
    ) -> Result<CopyOutcome, CopyError> {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 0;
        loop {
            match next.run(run, source, success).await {
                Ok(outcome) => {
                    if attempt > 0 {
                        info!(
                            run_id = ?run.id,
                            "Copied results after {} attempt(s)",
                            attempt + 1
                        );
                    }
                    return Ok(outcome);
                }
                Err(e) if attempt + 1 < attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        run_id = ?run.id,
                        "Failed to copy results (attempt {}/{}): {}. Retrying in {:?}",
                        attempt + 1,
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        run_id = ?run.id,
                        "Failed to copy results after {} attempts: {}",
                        attempts,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }
}
