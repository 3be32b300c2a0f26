//! Runs the run's flags as a command line in the model directory.
//!
//! The child gets the parameters file, output path and run id through
//! `SWEEP_PARAMETERS_FILE`, `SWEEP_OUTPUT_PATH` and `SWEEP_RUN_ID`. Its
//! output is forwarded to the log line by line. Stopping the run kills it.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use sweep_core::{ExecutionError, RunId};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::Notify;
use tracing::{info, warn};

use super::{ModelRunner, RunContext};

#[derive(Debug, Clone, Copy, Default)]
pub struct CommandRunner;

#[async_trait]
impl ModelRunner for CommandRunner {
    async fn run(&self, ctx: RunContext<'_>) -> Result<bool, ExecutionError> {
        let mut words = ctx.flags.split_whitespace();
        let program = words
            .next()
            .ok_or_else(|| ExecutionError::Runner("no command given in runner flags".to_string()))?;

        let mut child = Command::new(program)
            .args(words)
            .current_dir(ctx.model_path)
            .env("SWEEP_PARAMETERS_FILE", ctx.parameters_file)
            .env("SWEEP_OUTPUT_PATH", ctx.output_path)
            .env("SWEEP_RUN_ID", ctx.run_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutionError::Runner(format!("failed to start '{}': {}", program, e)))?;

        let stdout = child.stdout.take().map(|out| forward_lines(ctx.run_id, out, false));
        let stderr = child.stderr.take().map(|err| forward_lines(ctx.run_id, err, true));

        // notify_one keeps a permit, so a stop before we start waiting still counts
        let stop_signal = Arc::new(Notify::new());
        let signal = Arc::clone(&stop_signal);
        ctx.stop.register_stop_task(move || signal.notify_one());

        let finished = tokio::select! {
            status = child.wait() => Some(status),
            _ = stop_signal.notified() => None,
        };

        let success = match finished {
            Some(status) => {
                let status = status?;
                info!(run_id = ctx.run_id, %status, "Command exited");
                status.success()
            }
            None => {
                warn!(run_id = ctx.run_id, "Stopping command");
                child.start_kill()?;
                child.wait().await?;
                false
            }
        };

        for handle in [stdout, stderr].into_iter().flatten() {
            let _ = handle.await;
        }

        Ok(success)
    }
}

fn forward_lines<R>(run_id: RunId, reader: R, is_stderr: bool) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if is_stderr {
                warn!(run_id, "{}", line);
            } else {
                info!(run_id, "{}", line);
            }
        }
    })
}
