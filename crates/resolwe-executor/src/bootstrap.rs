// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executor lifecycle.
//!
//! [`Bootstrap`] runs one process invocation in a fixed order:
//!
//! 1. install logging with a fresh [`LogForwarder`]
//! 2. initialize the manager connection
//! 3. construct the executor named on the command line
//! 4. read the process script
//! 5. run the executor
//! 6. wait for pending log sends
//! 7. deinitialize the manager connection
//! 8. wait for any other tracked background work
//!
//! The module name is checked against the registry before step 2, so an
//! unknown executor never opens a manager connection. Once the connection is
//! up, steps 6-8 run whatever happened in steps 3-5.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::ExecutorConfig;
use crate::error::{ExecutorError, Result};
use crate::executor::RunContext;
use crate::logging::{self, DrainReport, LogForwarder};
use crate::manager::{ManagerChannel, ManagerConnection};
use crate::registry::{ExecutorConstructor, ExecutorRegistry};

/// What the drains after a successful run waited for.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Log sends awaited before the manager connection was closed
    pub log_drain: DrainReport,
    /// Background tasks of the run, awaited after the manager connection
    /// was closed, plus log sends issued after the first drain
    pub straggler_drain: DrainReport,
}

/// Runs one executor invocation against a manager connection.
pub struct Bootstrap {
    config: Arc<ExecutorConfig>,
    connection: Arc<dyn ManagerConnection>,
    registry: ExecutorRegistry,
}

impl Bootstrap {
    /// Create a bootstrap using the built-in executors.
    pub fn new(config: ExecutorConfig, connection: Arc<dyn ManagerConnection>) -> Self {
        Self {
            config: Arc::new(config),
            connection,
            registry: ExecutorRegistry::builtin(),
        }
    }

    /// Use a custom executor registry.
    pub fn with_registry(mut self, registry: ExecutorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    /// Run `module`, installing logging from `RESOLWE_LOG` for the duration.
    pub async fn run(&self, module: &str) -> Result<BootstrapReport> {
        let forwarder = LogForwarder::new();
        let _guard = logging::install(&forwarder, logging::env_filter());
        self.run_with_forwarder(module, &forwarder).await
    }

    /// Run `module` with logging already installed around `forwarder`.
    pub async fn run_with_forwarder(
        &self,
        module: &str,
        forwarder: &LogForwarder,
    ) -> Result<BootstrapReport> {
        let constructor = self.registry.resolve(module)?;

        self.connection.init().await?;
        let channel = ManagerChannel::new(self.connection.clone(), self.config.data_id);
        forwarder.attach(channel.clone());
        let ctx = RunContext::new(channel, self.config.clone());

        let outcome = self.execute(constructor, &ctx).await;
        if let Err(e) = &outcome {
            error!(error = %e, "executor failed");
        }

        let log_drain = forwarder.drain().await;
        forwarder.detach();
        if log_drain.failed > 0 {
            warn!(failed = log_drain.failed, "some log records were not delivered");
        }

        let deinit = self.connection.deinit().await;

        let mut straggler_drain = ctx.drain().await;
        straggler_drain.merge(forwarder.drain().await);
        info!(
            log_records = log_drain.total(),
            stragglers = straggler_drain.total(),
            "executor shut down"
        );

        match (outcome, deinit) {
            (Err(e), Err(deinit_error)) => {
                warn!(error = %deinit_error, "manager deinit failed after executor failure");
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(BootstrapReport {
                log_drain,
                straggler_drain,
            }),
        }
    }

    async fn execute(&self, constructor: ExecutorConstructor, ctx: &RunContext) -> Result<()> {
        let mut executor = constructor();
        let data_id = self.config.data_id;

        let script_path = self.config.process_script_path();
        let script = tokio::fs::read_to_string(&script_path).await.map_err(|e| {
            ExecutorError::Config(format!("cannot read {}: {}", script_path.display(), e))
        })?;

        info!(executor = executor.name(), data_id, "running executor");
        executor.run(ctx, data_id, &script).await
    }
}
