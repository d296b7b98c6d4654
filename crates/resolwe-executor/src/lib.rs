// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resolwe Executor - runs the process script of one Data object
//!
//! The manager prepares a working directory (`settings.json`, `data.json`,
//! `process.json`, `process_script.sh`) and starts the executor with the
//! name of the executor module to use. The executor opens a channel to the
//! manager, runs the script, streams status updates and log records back,
//! and closes the channel once everything it started has completed.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   resolve    ┌──────────────────┐
//! │  Bootstrap   │─────────────▶│ ExecutorRegistry │
//! └──────┬───────┘              └──────────────────┘
//!        │ run(ctx, data_id, script)
//!        ▼
//! ┌──────────────┐  update/finish/abort  ┌────────────────┐
//! │ FlowExecutor │──────────────────────▶│ ManagerChannel │──▶ manager
//! └──────────────┘                       └────────────────┘
//!        ▲ log records (LogForwarder) ───────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use resolwe_executor::{Bootstrap, ExecutorConfig, TcpManagerConnection};
//!
//! let config = ExecutorConfig::from_env()?;
//! let connection = Arc::new(TcpManagerConnection::new(config.manager.clone()));
//! Bootstrap::new(config, connection).run(".local").await?;
//! ```

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod manager;
pub mod registry;

pub use bootstrap::{Bootstrap, BootstrapReport};
pub use config::{ExecutorConfig, ExecutorFiles};
pub use error::{ExecutorError, Result};
pub use executor::{FlowExecutor, LocalFlowExecutor, NullFlowExecutor, ProcessBackend, RunContext};
pub use logging::{DrainReport, LogForwarder, ManagerLogLayer};
pub use manager::{
    ManagerChannel, ManagerConnection, ManagerEvent, MockManager, TcpManagerConnection,
};
pub use registry::{ExecutorConstructor, ExecutorRegistry};
