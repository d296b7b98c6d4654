// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resolwe flow executor.
//!
//! Started by the manager inside a prepared working directory:
//!
//! ```text
//! resolwe-executor .local
//! ```

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};

use resolwe_executor::config::ExecutorConfig;
use resolwe_executor::logging::{self, LogForwarder};
use resolwe_executor::{Bootstrap, TcpManagerConnection};

#[derive(Parser, Debug)]
#[command(name = "resolwe-executor", version, about = "Run a Resolwe process script")]
struct Args {
    /// Executor module to instantiate, e.g. `.local`
    module: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load .env file if present, before the log filter is read
    let dotenv = dotenvy::dotenv();

    let forwarder = LogForwarder::new();
    let _guard = logging::install(&forwarder, logging::env_filter());
    if let Err(e) = dotenv {
        debug!("No .env file loaded: {}", e);
    }

    let config = ExecutorConfig::from_env().context("loading executor configuration")?;
    info!(
        data_id = config.data_id,
        module = %args.module,
        work_dir = %config.work_dir.display(),
        manager_addr = %config.manager.manager_addr,
        "Starting Resolwe executor"
    );

    let connection = Arc::new(TcpManagerConnection::new(config.manager.clone()));
    let report = Bootstrap::new(config, connection)
        .run_with_forwarder(&args.module, &forwarder)
        .await?;

    info!(
        log_records = report.log_drain.total(),
        stragglers = report.straggler_drain.total(),
        "Executor finished"
    );
    Ok(())
}
