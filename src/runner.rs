//! Executors used by the CLI

use deployment::{ExecutionContext, ExecutionError, Executor};
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use crate::config::{ExecutorConfig, OPERATION_PLACEHOLDER};
use crate::ui;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STDERR_TAIL_LINES: usize = 10;

/// Runs the configured program once per operation
///
/// `{operation}` in the arguments is replaced with the operation name, which
/// is also exported as `TDEPLOY_OPERATION`. Stdout becomes the outcome
/// payload; a non-zero exit fails the operation with the tail of stderr.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandExecutor {
    pub fn new(config: &ExecutorConfig, working_dir: Option<PathBuf>) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            working_dir,
        }
    }

    fn args_for(&self, operation: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(OPERATION_PLACEHOLDER, operation))
            .collect()
    }

    fn spawn(&self, ctx: &ExecutionContext<'_>) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args_for(ctx.operation.name()))
            .env("TDEPLOY_OPERATION", ctx.operation.name())
            .env("TDEPLOY_SERVICE", ctx.operation.service())
            .env("TDEPLOY_DEPLOYMENT_ID", ctx.deployment_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.spawn()
    }
}

impl Executor for CommandExecutor {
    fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<String, ExecutionError> {
        ctx.check_cancelled()?;
        log::debug!(
            "Running {} {} for {}",
            self.program,
            self.args_for(ctx.operation.name()).join(" "),
            ctx.operation
        );

        let mut child = self.spawn(ctx).map_err(|e| {
            ExecutionError::failed(format!("Failed to execute {}: {e}", self.program))
        })?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if ctx.cancel.is_cancelled() => {
                    log::warn!("Killing {} for {}", self.program, ctx.operation);
                    if let Err(e) = child.kill() {
                        log::warn!("Could not kill {}: {e}", self.program);
                    }
                    let _ = child.wait();
                    return Err(ExecutionError::Cancelled);
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    return Err(ExecutionError::failed(format!(
                        "Failed to wait for {}: {e}",
                        self.program
                    )));
                }
            }
        };

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        if status.success() {
            Ok(stdout.trim_end().to_string())
        } else if ctx.cancel.is_cancelled() {
            // Ctrl-C reaches the child too
            Err(ExecutionError::Cancelled)
        } else {
            let tail = ui::tail_lines(&stderr, STDERR_TAIL_LINES);
            let message = if tail.is_empty() {
                format!("{} exited with {status}", self.program)
            } else {
                format!("{} exited with {status}: {tail}", self.program)
            };
            Err(ExecutionError::failed(message))
        }
    }
}

/// Read a pipe to the end on a separate thread
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Succeeds every operation without running anything
pub struct MockExecutor;

impl Executor for MockExecutor {
    fn execute(&self, ctx: &ExecutionContext<'_>) -> Result<String, ExecutionError> {
        ctx.check_cancelled()?;
        Ok(format!("mock: {}", ctx.operation))
    }
}
