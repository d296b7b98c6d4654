// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared driver for executors that run the script in a subprocess.

use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use resolwe_protocol::DataStatus;
use serde_json::{Map, Value};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, instrument, warn};

use super::RunContext;
use super::output::{OutputLine, ProcessState, classify};
use crate::error::{ExecutorError, Result};

/// Plain process output, relative to the data directory.
pub const STDOUT_FILE: &str = "stdout.txt";
/// JSON process output, relative to the data directory.
pub const JSONOUT_FILE: &str = "jsonout.txt";

/// Hooks a subprocess-based executor provides to [`drive`].
#[async_trait]
pub trait ProcessBackend: Send {
    /// Start the process. Returns its pid when there is one.
    async fn start(&mut self, ctx: &RunContext) -> Result<Option<u32>>;

    /// Hand the script to the started process.
    async fn run_script(&mut self, ctx: &RunContext, script: &str) -> Result<()>;

    /// Next line of process output, `None` at end of output.
    async fn next_line(&mut self) -> Result<Option<String>>;

    /// Wait for the process to exit and return its exit code.
    async fn end(&mut self) -> Result<i32>;

    /// Stop the process before it finished on its own.
    async fn terminate(&mut self, ctx: &RunContext) -> Result<()>;
}

/// Run `script` through `backend`, reporting to the manager.
///
/// On failure the Data object is marked as errored, the manager is told the
/// run was aborted and finished with return code 1, and the original error
/// is returned.
#[instrument(skip_all, fields(data_id = data_id))]
pub async fn drive<B>(backend: &mut B, ctx: &RunContext, data_id: u64, script: &str) -> Result<()>
where
    B: ProcessBackend + ?Sized,
{
    match run_process(backend, ctx, data_id, script).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(error = %e, "process run failed");
            report_failure(ctx, &e).await;
            Err(e)
        }
    }
}

async fn run_process<B>(backend: &mut B, ctx: &RunContext, data_id: u64, script: &str) -> Result<()>
where
    B: ProcessBackend + ?Sized,
{
    let data_dir = ctx.config.data_dir.as_path();
    let Some(mut outputs) = OutputFiles::create(data_dir).await? else {
        error!(
            data_dir = %data_dir.display(),
            "stdout or jsonout file already exists, another executor is writing here"
        );
        ctx.channel.abort().await?;
        return Ok(());
    };

    let pid = backend.start(ctx).await?;
    let mut changeset = Map::new();
    changeset.insert("status".into(), DataStatus::Processing.into());
    if let Some(pid) = pid {
        changeset.insert("process_pid".into(), pid.into());
    }
    ctx.channel.update_status(changeset).await?;

    backend.run_script(ctx, script).await?;

    let mut state = ProcessState::new(data_id);
    while let Some(line) = backend.next_line().await? {
        match classify(&line) {
            OutputLine::Spawn(spawn) => {
                outputs.stdout(&line).await?;
                state.spawn_processes.push(spawn);
            }
            OutputLine::Export(file) => {
                let unique_name = state.record_export(&file);
                export_file(&data_dir.join(&file), &ctx.config.upload_dir().join(&unique_name))
                    .await?;
            }
            OutputLine::Json(objects) => {
                outputs.jsonout(&line).await?;
                let changeset = state.apply(&objects);
                if !changeset.is_empty() {
                    ctx.channel.update_status(changeset).await?;
                }
                if state.process_rc > 0 {
                    info!(process_rc = state.process_rc, "process reported failure, stopping it");
                    outputs.close().await?;
                    backend.terminate(ctx).await?;
                    ctx.channel.finish(state.process_rc, None, None).await?;
                    return Ok(());
                }
            }
            OutputLine::Text => outputs.stdout(&line).await?,
        }
    }
    outputs.close().await?;

    let exit_code = backend.end().await?;
    let process_rc = state.process_rc.max(exit_code);
    info!(process_rc, exit_code, "process finished");

    let (spawn_processes, exported_files) =
        if process_rc == 0 && !state.spawn_processes.is_empty() {
            (Some(state.spawn_processes), Some(state.exported_files))
        } else {
            (None, None)
        };
    ctx.channel
        .finish(process_rc, spawn_processes, exported_files)
        .await?;
    Ok(())
}

/// Best-effort failure report; errors are only logged.
async fn report_failure(ctx: &RunContext, err: &ExecutorError) {
    let mut changeset = Map::new();
    changeset.insert(
        "process_error".into(),
        Value::Array(vec![Value::String(format!("executor failed: {}", err))]),
    );
    changeset.insert("status".into(), DataStatus::Error.into());

    if let Err(e) = ctx.channel.update_status(changeset).await {
        warn!(error = %e, "could not mark data object as failed");
    }
    if let Err(e) = ctx.channel.abort().await {
        warn!(error = %e, "could not send abort");
    }
    if let Err(e) = ctx.channel.finish(1, None, None).await {
        warn!(error = %e, "could not send finish");
    }
}

/// Move an exported file into the upload directory.
async fn export_file(source: &Path, target: &Path) -> Result<()> {
    if let Err(e) = fs::rename(source, target).await {
        if e.kind() == ErrorKind::NotFound {
            return Err(ExecutorError::Process(format!(
                "exported file {} does not exist",
                source.display()
            )));
        }
        // Different filesystems: copy, then remove the original.
        fs::copy(source, target).await?;
        fs::remove_file(source).await?;
    }
    Ok(())
}

/// `stdout.txt` and `jsonout.txt`, created exclusively.
struct OutputFiles {
    stdout: File,
    jsonout: File,
}

impl OutputFiles {
    /// Create both files. Returns `None` when either already exists.
    async fn create(dir: &Path) -> Result<Option<Self>> {
        let Some(stdout) = create_new(&dir.join(STDOUT_FILE)).await? else {
            return Ok(None);
        };
        let Some(jsonout) = create_new(&dir.join(JSONOUT_FILE)).await? else {
            return Ok(None);
        };
        Ok(Some(Self { stdout, jsonout }))
    }

    async fn stdout(&mut self, line: &str) -> Result<()> {
        write_line(&mut self.stdout, line).await
    }

    async fn jsonout(&mut self, line: &str) -> Result<()> {
        write_line(&mut self.jsonout, line).await
    }

    async fn close(&mut self) -> Result<()> {
        self.stdout.flush().await?;
        self.jsonout.flush().await?;
        Ok(())
    }
}

async fn create_new(path: &Path) -> Result<Option<File>> {
    match OpenOptions::new().write(true).create_new(true).open(path).await {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_line(file: &mut File, line: &str) -> Result<()> {
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    Ok(())
}
