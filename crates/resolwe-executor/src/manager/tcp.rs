// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Manager connection over the framed TCP protocol.

use std::sync::Arc;

use async_trait::async_trait;
use resolwe_protocol::{ExecutorCommand, ManagerClient, ManagerClientConfig, ManagerReply};
use tracing::{info, instrument};

use super::ManagerConnection;
use crate::error::Result;

/// [`ManagerConnection`] backed by a [`ManagerClient`].
pub struct TcpManagerConnection {
    client: Arc<ManagerClient>,
}

impl TcpManagerConnection {
    pub fn new(config: ManagerClientConfig) -> Self {
        Self {
            client: Arc::new(ManagerClient::new(config)),
        }
    }

    /// Get the underlying client.
    pub fn client(&self) -> &ManagerClient {
        &self.client
    }
}

#[async_trait]
impl ManagerConnection for TcpManagerConnection {
    #[instrument(skip(self), fields(addr = %self.client.config().manager_addr))]
    async fn init(&self) -> Result<()> {
        self.client.connect().await?;
        info!("manager channel initialized");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn deinit(&self) -> Result<()> {
        self.client.close().await;
        info!("manager channel closed");
        Ok(())
    }

    async fn send(
        &self,
        command: &ExecutorCommand,
        expect_reply: bool,
    ) -> Result<Option<ManagerReply>> {
        if expect_reply {
            let reply: ManagerReply = self.client.request(command).await?;
            Ok(Some(reply))
        } else {
            self.client.notify(command).await?;
            Ok(None)
        }
    }
}
