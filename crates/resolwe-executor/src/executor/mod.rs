// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flow executors.
//!
//! An executor takes the process script of one Data object, runs it and
//! reports progress and the final result to the manager.

pub mod local;
pub mod null;
pub mod output;
pub mod process;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio_util::task::TaskTracker;
use tracing::warn;

use crate::config::ExecutorConfig;
use crate::error::Result;
use crate::logging::DrainReport;
use crate::manager::ManagerChannel;

pub use local::LocalFlowExecutor;
pub use null::NullFlowExecutor;
pub use process::ProcessBackend;

/// Everything an executor needs during a run.
#[derive(Clone)]
pub struct RunContext {
    /// Channel to the manager, bound to the Data object
    pub channel: ManagerChannel,
    /// Run configuration
    pub config: Arc<ExecutorConfig>,
    tasks: TaskTracker,
    spawned: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
}

impl RunContext {
    pub fn new(channel: ManagerChannel, config: Arc<ExecutorConfig>) -> Self {
        Self {
            channel,
            config,
            tasks: TaskTracker::new(),
            spawned: Arc::new(AtomicUsize::new(0)),
            failed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Spawn background work the bootstrap waits for before exiting.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawned.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(task);
        let failed = self.failed.clone();
        self.tasks.spawn(async move {
            if let Err(e) = task.await {
                warn!(error = %e, "background task failed");
                failed.fetch_add(1, Ordering::Relaxed);
            }
        });
    }

    /// Stop accepting background work and wait for what was spawned.
    ///
    /// The report covers every task spawned during the run.
    pub async fn drain(&self) -> DrainReport {
        self.tasks.close();
        self.tasks.wait().await;
        let failed = self.failed.load(Ordering::Relaxed);
        DrainReport {
            completed: self.spawned.load(Ordering::Relaxed).saturating_sub(failed),
            failed,
        }
    }
}

/// A concrete way of running a process script.
#[async_trait]
pub trait FlowExecutor: Send {
    /// Executor kind, as registered.
    fn name(&self) -> &'static str;

    /// Run `script` for the Data object `data_id`.
    async fn run(&mut self, ctx: &RunContext, data_id: u64, script: &str) -> Result<()>;
}
