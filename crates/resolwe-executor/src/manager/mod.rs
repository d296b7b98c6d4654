// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Manager communication channel.
//!
//! A [`ManagerConnection`] owns the transport; a [`ManagerChannel`] binds it
//! to one Data object and offers the commands executors send.

pub mod mock;
pub mod tcp;

use std::sync::Arc;

use async_trait::async_trait;
use resolwe_protocol::{Command, ExecutorCommand, ExportedFiles, ManagerReply};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::Result;

pub use mock::{ManagerEvent, MockManager};
pub use tcp::TcpManagerConnection;

/// Transport to the manager.
#[async_trait]
pub trait ManagerConnection: Send + Sync {
    /// Establish the connection. Called once before any command is sent.
    async fn init(&self) -> Result<()>;

    /// Tear the connection down. Called once after the executor finished.
    async fn deinit(&self) -> Result<()>;

    /// Send a command. Returns the reply when `expect_reply` is set.
    async fn send(
        &self,
        command: &ExecutorCommand,
        expect_reply: bool,
    ) -> Result<Option<ManagerReply>>;
}

/// Manager channel for one Data object.
#[derive(Clone)]
pub struct ManagerChannel {
    connection: Arc<dyn ManagerConnection>,
    data_id: u64,
}

impl ManagerChannel {
    pub fn new(connection: Arc<dyn ManagerConnection>, data_id: u64) -> Self {
        Self {
            connection,
            data_id,
        }
    }

    /// Id of the Data object commands are sent for.
    pub fn data_id(&self) -> u64 {
        self.data_id
    }

    /// Send a command on behalf of the Data object.
    ///
    /// Returns `false` when the manager answered `ER`. Commands sent without
    /// expecting a reply always return `true` once written.
    pub async fn send_command(&self, command: Command, expect_reply: bool) -> Result<bool> {
        let name = command.name();
        let command = ExecutorCommand::new(self.data_id, command);
        debug!(data_id = self.data_id, command = name, expect_reply, "sending manager command");

        match self.connection.send(&command, expect_reply).await? {
            Some(reply) if !reply.is_ok() => {
                warn!(data_id = self.data_id, command = name, "manager replied with error");
                Ok(false)
            }
            _ => Ok(true),
        }
    }

    /// Apply a changeset to the Data object.
    pub async fn update_status(&self, changeset: Map<String, Value>) -> Result<bool> {
        self.send_command(Command::Update { changeset }, true).await
    }

    /// Report that processing finished.
    pub async fn finish(
        &self,
        process_rc: i32,
        spawn_processes: Option<Vec<Value>>,
        exported_files_mapper: Option<ExportedFiles>,
    ) -> Result<bool> {
        self.send_command(
            Command::Finish {
                process_rc,
                spawn_processes,
                exported_files_mapper,
            },
            true,
        )
        .await
    }

    /// Report that processing was aborted.
    pub async fn abort(&self) -> Result<bool> {
        self.send_command(Command::Abort, false).await
    }

    /// Forward a log record.
    pub async fn send_log(&self, record: Value) -> Result<bool> {
        self.send_command(Command::Log { message: record }, false)
            .await
    }
}
