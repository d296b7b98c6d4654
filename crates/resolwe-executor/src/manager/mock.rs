// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock manager connection for testing.
//!
//! Records every call in order without opening a socket. Commands pass
//! through their JSON wire form first, so anything the manager could not
//! decode fails here as well.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use resolwe_protocol::{ClientError, ExecutorCommand, ManagerReply};

use super::ManagerConnection;
use crate::error::{ExecutorError, Result};

/// A call observed by [`MockManager`].
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    Init,
    Deinit,
    Command {
        command: ExecutorCommand,
        expect_reply: bool,
    },
}

/// Mock manager connection.
#[derive(Default)]
pub struct MockManager {
    events: Arc<Mutex<Vec<ManagerEvent>>>,
    /// If true, `init` fails without recording anything
    pub fail_init: bool,
    /// If true, `deinit` is recorded and then fails
    pub fail_deinit: bool,
    /// If true, every request is answered with `ER`
    pub reject: bool,
    /// Delay applied to every command, to simulate a slow manager
    pub send_delay_ms: u64,
}

impl MockManager {
    /// Create a mock manager that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock manager whose `init` fails.
    pub fn failing_init() -> Self {
        Self {
            fail_init: true,
            ..Self::default()
        }
    }

    /// Create a mock manager answering every request with `ER`.
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    /// Make `deinit` fail after recording it.
    pub fn with_failing_deinit(mut self) -> Self {
        self.fail_deinit = true;
        self
    }

    /// Delay every command by `delay_ms`.
    pub fn with_send_delay_ms(mut self, delay_ms: u64) -> Self {
        self.send_delay_ms = delay_ms;
        self
    }

    /// All recorded calls, in order.
    pub fn events(&self) -> Vec<ManagerEvent> {
        self.lock().clone()
    }

    /// Recorded commands, in order.
    pub fn commands(&self) -> Vec<ExecutorCommand> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                ManagerEvent::Command { command, .. } => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of recorded `init` calls.
    pub fn init_count(&self) -> usize {
        self.count(|event| matches!(event, ManagerEvent::Init))
    }

    /// Number of recorded `deinit` calls.
    pub fn deinit_count(&self) -> usize {
        self.count(|event| matches!(event, ManagerEvent::Deinit))
    }

    fn count(&self, predicate: impl Fn(&ManagerEvent) -> bool) -> usize {
        self.lock().iter().filter(|event| predicate(event)).count()
    }

    fn record(&self, event: ManagerEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ManagerEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ManagerConnection for MockManager {
    async fn init(&self) -> Result<()> {
        if self.fail_init {
            return Err(ExecutorError::Manager(ClientError::Connect(
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "mock manager down"),
            )));
        }
        self.record(ManagerEvent::Init);
        Ok(())
    }

    async fn deinit(&self) -> Result<()> {
        self.record(ManagerEvent::Deinit);
        if self.fail_deinit {
            return Err(ExecutorError::Manager(ClientError::NotConnected));
        }
        Ok(())
    }

    async fn send(
        &self,
        command: &ExecutorCommand,
        expect_reply: bool,
    ) -> Result<Option<ManagerReply>> {
        if self.send_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.send_delay_ms)).await;
        }
        let command: ExecutorCommand = serde_json::from_value(serde_json::to_value(command)?)?;
        self.record(ManagerEvent::Command {
            command,
            expect_reply,
        });

        if !expect_reply {
            return Ok(None);
        }
        Ok(Some(if self.reject {
            ManagerReply::error()
        } else {
            ManagerReply::ok()
        }))
    }
}
