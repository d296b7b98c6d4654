// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resolwe Protocol - framed JSON communication between executors and the manager
//!
//! An executor process keeps one TCP connection to the manager for the whole
//! run of a Data object. Every command is a frame carrying a JSON payload.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    resolwe-protocol                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Commands: update / finish / abort / log  +  OK|ER replies  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Serialization: JSON (serde_json)                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Framing: length + type header over TCP (tokio)             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use resolwe_protocol::{Command, ExecutorCommand, ManagerClient, ManagerClientConfig, ManagerReply};
//!
//! let client = ManagerClient::new(ManagerClientConfig::default());
//! client.connect().await?;
//!
//! let command = ExecutorCommand::new(42, Command::Abort);
//! client.notify(&command).await?;
//!
//! let command = ExecutorCommand::new(42, Command::Finish {
//!     process_rc: 0,
//!     spawn_processes: None,
//!     exported_files_mapper: None,
//! });
//! let reply: ManagerReply = client.request(&command).await?;
//! ```

pub mod client;
pub mod frame;
pub mod messages;
pub mod server;

pub use client::{ClientError, ManagerClient, ManagerClientConfig};
pub use frame::{Frame, FrameError, FramedStream, MessageType};
pub use messages::{
    Command, DataStatus, ExecutorCommand, ExportedFiles, ManagerReply, ReplyResult,
};
pub use server::{ManagerServer, ServerError};
