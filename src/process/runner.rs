//! The real [`CommandRunner`], backed by `tokio::process`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{CommandRunner, ExecutionResult, OutputSink, ProcessTree, RunError, RunOptions};

/// Extra time the output reader gets after the deadline to pick up the last
/// lines of a child that was just killed.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Spawns real OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }

    fn build_command(
        &self,
        command: &str,
        arguments: &str,
        options: &RunOptions,
    ) -> Result<Command> {
        let mut cmd = Command::new(command);

        #[cfg(windows)]
        {
            if !arguments.trim().is_empty() {
                cmd.raw_arg(arguments);
            }
        }
        #[cfg(not(windows))]
        {
            cmd.args(super::split_arguments(arguments));
        }

        let working_directory = match &options.working_directory {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("Failed to get current directory")?,
        };
        cmd.current_dir(working_directory);

        if let Some(env) = &options.environment {
            cmd.envs(env);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(if options.output_sink.is_some() {
            Stdio::piped()
        } else {
            Stdio::inherit()
        });
        cmd.stderr(Stdio::inherit());

        #[cfg(unix)]
        cmd.process_group(0);

        // Never leave a child behind if the future is dropped.
        cmd.kill_on_drop(true);

        Ok(cmd)
    }

    /// Forward every stdout line of `child` into `sink`, in order.
    fn spawn_drain(child: &mut Child, sink: &OutputSink) -> Option<JoinHandle<()>> {
        let stdout = child.stdout.take()?;
        let sink = sink.clone();

        Some(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => sink.push(line),
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Stopped reading child output: {}", e);
                        break;
                    }
                }
            }
        }))
    }

    /// Wait for the output reader to finish.
    ///
    /// The pipe only reaches EOF once every process holding it has exited, so
    /// with a deadline the wait is capped. Past it, whatever still holds the
    /// pipe is killed and the reader is aborted. Either way the task is joined
    /// before this returns.
    async fn join_drain(
        drain: Option<JoinHandle<()>>,
        deadline: Option<Instant>,
        tree: &ProcessTree,
    ) {
        let Some(mut handle) = drain else {
            return;
        };

        let joined = match deadline {
            None => (&mut handle).await,
            Some(deadline) => {
                let limit = deadline.max(Instant::now() + DRAIN_GRACE);
                match tokio::time::timeout_at(limit, &mut handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        warn!(
                            "Child output is still held open past the deadline, \
                             killing its process tree"
                        );
                        if let Err(e) = tree.terminate() {
                            warn!("{}", e);
                        }
                        handle.abort();
                        handle.await
                    }
                }
            }
        };

        match joined {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => debug!("Output reader stopped at the deadline"),
            Err(e) => warn!("Output reader task failed: {}", e),
        }
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    #[tracing::instrument(skip(self, options), fields(timeout_ms = options.timeout_ms))]
    async fn run(
        &self,
        command: &str,
        arguments: &str,
        options: &RunOptions,
    ) -> Result<ExecutionResult> {
        options.validate(|key| std::env::var_os(key).is_some())?;

        let mut cmd = self.build_command(command, arguments, options)?;

        debug!("Starting {} {}", command, arguments);
        let mut child = cmd.spawn().map_err(|source| RunError::Launch {
            command: command.to_string(),
            source,
        })?;

        let tree = ProcessTree::attach(&child);
        let drain = options
            .output_sink
            .as_ref()
            .and_then(|sink| Self::spawn_drain(&mut child, sink));

        let deadline = (options.timeout_ms > 0)
            .then(|| Instant::now() + Duration::from_millis(options.timeout_ms as u64));
        let status = match deadline {
            None => Some(child.wait().await),
            Some(deadline) => tokio::time::timeout_at(deadline, child.wait()).await.ok(),
        };

        let result = match status {
            Some(status) => status
                .map(|status| ExecutionResult::exited(exit_code(status)))
                .with_context(|| format!("Failed to wait for '{}'", command)),
            None => {
                warn!(
                    "'{}' did not exit within {}ms, killing its process tree",
                    command, options.timeout_ms
                );
                if let Err(e) = tree.terminate() {
                    warn!("{}", e);
                }
                if let Err(e) = child.kill().await {
                    debug!("Direct kill after tree termination: {}", e);
                }
                Ok(ExecutionResult::timed_out())
            }
        };

        Self::join_drain(drain, deadline, &tree).await;
        let result = result?;

        info!(
            "'{}' finished: exit code {}, timed out: {}",
            command, result.exit_code, result.timed_out
        );
        Ok(result)
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}
