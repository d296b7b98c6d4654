// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executor configuration.
//!
//! The manager prepares a working directory for every executor run with a
//! few well-known JSON files and the process script. Environment variables
//! select that directory and may override the manager address.

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use resolwe_protocol::ManagerClientConfig;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{ExecutorError, Result};

/// Well-known files in the executor working directory.
pub struct ExecutorFiles;

impl ExecutorFiles {
    /// Executor settings written by the manager
    pub const EXECUTOR_SETTINGS: &'static str = "settings.json";
    /// Serialized Data object
    pub const DATA: &'static str = "data.json";
    /// Serialized process definition
    pub const PROCESS: &'static str = "process.json";
    /// Script run by the executor
    pub const PROCESS_SCRIPT: &'static str = "process_script.sh";
}

/// Environment variable selecting the working directory.
pub const WORKDIR_ENV: &str = "RESOLWE_EXECUTOR_WORKDIR";
/// Environment variable overriding the manager address.
pub const MANAGER_ADDR_ENV: &str = "RESOLWE_MANAGER_ADDR";
/// Environment variable holding the tracing filter.
pub const LOG_ENV: &str = "RESOLWE_LOG";
/// Filter used when `RESOLWE_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "resolwe_executor=info";

const DEFAULT_KILL_DELAY_MS: u64 = 5_000;
const DEFAULT_LOCAL_COMMAND: &str = "/bin/bash";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct Settings {
    data_dir: PathBuf,
    #[serde(default)]
    upload_dir: Option<PathBuf>,
    #[serde(default)]
    manager_addr: Option<String>,
    #[serde(default)]
    connect_timeout_ms: Option<u64>,
    #[serde(default)]
    reply_timeout_ms: Option<u64>,
    #[serde(default)]
    kill_delay_ms: Option<u64>,
    #[serde(default)]
    local_command: Option<String>,
}

/// Configuration of one executor run.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Directory holding the well-known files
    pub work_dir: PathBuf,
    /// Id of the Data object being processed
    pub data_id: u64,
    /// Full contents of `data.json`
    pub data: Map<String, Value>,
    /// Directory the process writes its outputs into
    pub data_dir: PathBuf,
    /// Directory exported files are moved into (defaults to `data_dir`)
    pub upload_dir: Option<PathBuf>,
    /// Contents of `process.json`, `Null` when absent
    pub process: Value,
    /// Manager connection settings
    pub manager: ManagerClientConfig,
    /// Delay between SIGTERM and SIGKILL when terminating a process
    pub kill_delay_ms: u64,
    /// Interpreter the local executor feeds the script to
    pub local_command: String,
}

impl ExecutorConfig {
    /// Create a configuration without reading any files.
    pub fn new(data_id: u64, data_dir: impl Into<PathBuf>) -> Self {
        let mut data = Map::new();
        data.insert("id".to_string(), Value::from(data_id));
        Self {
            work_dir: PathBuf::from("."),
            data_id,
            data,
            data_dir: data_dir.into(),
            upload_dir: None,
            process: Value::Null,
            manager: ManagerClientConfig::default(),
            kill_delay_ms: DEFAULT_KILL_DELAY_MS,
            local_command: DEFAULT_LOCAL_COMMAND.to_string(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Optional Environment Variables
    /// - `RESOLWE_EXECUTOR_WORKDIR` - Working directory (default: ".")
    /// - `RESOLWE_MANAGER_ADDR` - Manager address, overrides `MANAGER_ADDR`
    pub fn from_env() -> Result<Self> {
        let work_dir = env::var(WORKDIR_ENV).unwrap_or_else(|_| ".".to_string());
        let mut config = Self::load(work_dir)?;

        if let Ok(addr) = env::var(MANAGER_ADDR_ENV) {
            config.manager.manager_addr = parse_addr(MANAGER_ADDR_ENV, &addr)?;
        }
        Ok(config)
    }

    /// Load configuration from the well-known files in `work_dir`.
    pub fn load(work_dir: impl AsRef<Path>) -> Result<Self> {
        let work_dir = work_dir.as_ref().to_path_buf();

        let settings: Settings = read_json(&work_dir, ExecutorFiles::EXECUTOR_SETTINGS)?;
        let data: Map<String, Value> = read_json(&work_dir, ExecutorFiles::DATA)?;
        let data_id = data.get("id").and_then(Value::as_u64).ok_or_else(|| {
            ExecutorError::Config(format!(
                "{} has no integer 'id'",
                ExecutorFiles::DATA
            ))
        })?;

        let process_path = work_dir.join(ExecutorFiles::PROCESS);
        let process = if process_path.exists() {
            read_json(&work_dir, ExecutorFiles::PROCESS)?
        } else {
            Value::Null
        };

        let mut manager = ManagerClientConfig::default();
        if let Some(addr) = settings.manager_addr.as_deref() {
            manager.manager_addr = parse_addr("MANAGER_ADDR", addr)?;
        }
        if let Some(ms) = settings.connect_timeout_ms {
            manager.connect_timeout_ms = ms;
        }
        if let Some(ms) = settings.reply_timeout_ms {
            manager.reply_timeout_ms = ms;
        }

        Ok(Self {
            data_dir: work_dir.join(settings.data_dir),
            upload_dir: settings.upload_dir.map(|dir| work_dir.join(dir)),
            work_dir,
            data_id,
            data,
            process,
            manager,
            kill_delay_ms: settings.kill_delay_ms.unwrap_or(DEFAULT_KILL_DELAY_MS),
            local_command: settings
                .local_command
                .unwrap_or_else(|| DEFAULT_LOCAL_COMMAND.to_string()),
        })
    }

    /// Path of the process script.
    pub fn process_script_path(&self) -> PathBuf {
        self.work_dir.join(ExecutorFiles::PROCESS_SCRIPT)
    }

    /// Directory exported files are moved into.
    pub fn upload_dir(&self) -> &Path {
        self.upload_dir.as_deref().unwrap_or(&self.data_dir)
    }

    /// Executor-specific requirements from `process.json`.
    pub fn executor_requirements(&self, kind: &str) -> Option<&Value> {
        self.process
            .get("requirements")?
            .get("executor")?
            .get(kind)
    }

    /// Resource requirements from `process.json`.
    pub fn resources(&self) -> Option<&Value> {
        self.process.get("requirements")?.get("resources")
    }

    /// Set the working directory.
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    /// Set the manager address.
    pub fn with_manager_addr(mut self, addr: SocketAddr) -> Self {
        self.manager.manager_addr = addr;
        self
    }

    /// Set the upload directory.
    pub fn with_upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.upload_dir = Some(dir.into());
        self
    }

    /// Set the delay between SIGTERM and SIGKILL.
    pub fn with_kill_delay_ms(mut self, delay_ms: u64) -> Self {
        self.kill_delay_ms = delay_ms;
        self
    }

    /// Set the interpreter used by the local executor.
    pub fn with_local_command(mut self, command: impl Into<String>) -> Self {
        self.local_command = command.into();
        self
    }
}

fn read_json<T: serde::de::DeserializeOwned>(dir: &Path, name: &str) -> Result<T> {
    let path = dir.join(name);
    let raw = fs::read_to_string(&path)
        .map_err(|e| ExecutorError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    serde_json::from_str(&raw)
        .map_err(|e| ExecutorError::Config(format!("invalid {}: {}", path.display(), e)))
}

fn parse_addr(key: &str, value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .map_err(|e| ExecutorError::Config(format!("invalid {}: {}", key, e)))
}
