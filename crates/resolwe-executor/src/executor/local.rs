// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Local executor: runs the script with a shell on this machine.

use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::process::{self, ProcessBackend};
use super::{FlowExecutor, RunContext};
use crate::error::{ExecutorError, Result};

/// Wraps the script so that stderr is merged into stdout, commands are
/// echoed and brace expansion is off.
fn wrap_script(script: &str) -> String {
    ["exec 2>&1", "set -x", "set +B", script, "exit"].join("\n") + "\n"
}

/// Executor running the script through a local shell.
#[derive(Default)]
pub struct LocalFlowExecutor {
    child: Option<Child>,
    stdout: Option<BufReader<ChildStdout>>,
}

impl LocalFlowExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn child(&mut self) -> Result<&mut Child> {
        self.child
            .as_mut()
            .ok_or_else(|| ExecutorError::Process("process not started".to_string()))
    }
}

#[async_trait]
impl FlowExecutor for LocalFlowExecutor {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn run(&mut self, ctx: &RunContext, data_id: u64, script: &str) -> Result<()> {
        process::drive(self, ctx, data_id, script).await
    }
}

#[async_trait]
impl ProcessBackend for LocalFlowExecutor {
    async fn start(&mut self, ctx: &RunContext) -> Result<Option<u32>> {
        let command = &ctx.config.local_command;
        let mut child = Command::new(command)
            .current_dir(&ctx.config.data_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutorError::Process(format!("failed to start {}: {}", command, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutorError::Process("stdout not captured".to_string()))?;
        let pid = child.id();
        info!(command = %command, pid, "process started");

        self.stdout = Some(BufReader::new(stdout));
        self.child = Some(child);
        Ok(pid)
    }

    async fn run_script(&mut self, ctx: &RunContext, script: &str) -> Result<()> {
        let mut stdin = self
            .child()?
            .stdin
            .take()
            .ok_or_else(|| ExecutorError::Process("stdin not captured".to_string()))?;

        // Written in the background so a large script cannot block on a
        // full pipe while nobody reads the output yet.
        let script = wrap_script(script);
        ctx.spawn(async move {
            if let Err(e) = stdin.write_all(script.as_bytes()).await {
                warn!(error = %e, "could not write script to process stdin");
            }
            // Dropping stdin closes the pipe.
        });
        Ok(())
    }

    async fn next_line(&mut self) -> Result<Option<String>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut buf = Vec::new();
        if stdout.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&buf);
        Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
    }

    async fn end(&mut self) -> Result<i32> {
        let status = self.child()?.wait().await?;
        self.stdout = None;
        // Killed by a signal: report it the way a shell would.
        let code = status
            .code()
            .or_else(|| status.signal().map(|signal| 128 + signal))
            .unwrap_or(1);
        debug!(code, "process exited");
        Ok(code)
    }

    async fn terminate(&mut self, ctx: &RunContext) -> Result<()> {
        let kill_delay = Duration::from_millis(ctx.config.kill_delay_ms);
        let child = self.child()?;

        let Some(pid) = child.id() else {
            // Already reaped.
            return Ok(());
        };
        match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => return Err(ExecutorError::Process(format!("SIGTERM failed: {}", e))),
        }

        if tokio::time::timeout(kill_delay, child.wait()).await.is_err() {
            warn!(pid, "process ignored SIGTERM, killing it");
            child.kill().await?;
        }
        self.stdout = None;
        Ok(())
    }
}
