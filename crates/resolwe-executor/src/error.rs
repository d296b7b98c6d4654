// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executor error types.

use resolwe_protocol::ClientError;
use thiserror::Error;

/// Errors that can occur while bootstrapping or running an executor.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecutorError {
    /// Configuration error (missing file, missing key or invalid value)
    #[error("configuration error: {0}")]
    Config(String),

    /// The module name does not name an executor kind
    #[error("invalid executor module name: {0:?}")]
    InvalidModuleName(String),

    /// No executor is registered for the kind
    #[error("unknown executor '{kind}' (known: {})", known.join(", "))]
    UnknownExecutor {
        /// Requested executor kind
        kind: String,
        /// Kinds present in the registry
        known: Vec<String>,
    },

    /// Manager channel failure
    #[error("manager error: {0}")]
    Manager(#[from] ClientError),

    /// The processing subprocess could not be driven
    #[error("process error: {0}")]
    Process(String),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for executor operations.
pub type Result<T> = std::result::Result<T, ExecutorError>;
