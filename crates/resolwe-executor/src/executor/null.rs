// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Null executor: reports success without running anything.

use async_trait::async_trait;
use tracing::info;

use super::{FlowExecutor, RunContext};
use crate::error::Result;

pub struct NullFlowExecutor;

#[async_trait]
impl FlowExecutor for NullFlowExecutor {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn run(&mut self, ctx: &RunContext, data_id: u64, _script: &str) -> Result<()> {
        info!(data_id, "null executor, skipping script");
        ctx.channel.finish(0, None, None).await?;
        Ok(())
    }
}
