// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! TCP client used by executors to talk to the manager.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::frame::{Frame, FrameError, FramedStream};

/// Errors that can occur in the manager client
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect error: {0}")]
    Connect(std::io::Error),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no connection established")]
    NotConnected,

    #[error("connection timed out after {0}ms")]
    Timeout(u64),

    #[error("no reply from the manager after {0}ms")]
    ReplyTimeout(u64),
}

/// Configuration for the manager client
#[derive(Debug, Clone)]
pub struct ManagerClientConfig {
    /// Manager address to connect to
    pub manager_addr: SocketAddr,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// How long to wait for a reply to a request, in milliseconds
    pub reply_timeout_ms: u64,
}

impl Default for ManagerClientConfig {
    fn default() -> Self {
        Self {
            manager_addr: SocketAddr::from(([127, 0, 0, 1], 8765)),
            connect_timeout_ms: 10_000,
            reply_timeout_ms: 60_000,
        }
    }
}

/// Client holding a single TCP connection to the manager.
///
/// Requests are serialized over the connection; a request holds the
/// connection until its reply has been read. After a failed exchange the
/// connection is dropped and reopened by the next call, until [`close`]
/// is called.
///
/// [`close`]: ManagerClient::close
pub struct ManagerClient {
    connection: Mutex<Option<FramedStream<TcpStream>>>,
    /// Set by `connect`, cleared by `close`
    active: AtomicBool,
    config: ManagerClientConfig,
}

impl ManagerClient {
    /// Create a new client with the given configuration
    pub fn new(config: ManagerClientConfig) -> Self {
        Self {
            connection: Mutex::new(None),
            active: AtomicBool::new(false),
            config,
        }
    }

    /// Get the client configuration
    pub fn config(&self) -> &ManagerClientConfig {
        &self.config
    }

    /// Connect to the manager
    #[instrument(skip(self), fields(addr = %self.config.manager_addr))]
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut conn_guard = self.connection.lock().await;
        if conn_guard.is_some() {
            debug!("reusing existing connection");
            return Ok(());
        }
        *conn_guard = Some(self.open().await?);
        self.active.store(true, Ordering::Release);
        Ok(())
    }

    /// The open stream, reconnecting if a failed exchange dropped it.
    async fn stream<'a>(
        &self,
        slot: &'a mut Option<FramedStream<TcpStream>>,
    ) -> Result<&'a mut FramedStream<TcpStream>, ClientError> {
        if slot.is_none() {
            if !self.active.load(Ordering::Acquire) {
                return Err(ClientError::NotConnected);
            }
            debug!("reconnecting to manager");
            *slot = Some(self.open().await?);
        }
        slot.as_mut().ok_or(ClientError::NotConnected)
    }

    async fn open(&self) -> Result<FramedStream<TcpStream>, ClientError> {
        info!(addr = %self.config.manager_addr, "connecting to manager");

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(self.config.manager_addr))
            .await
            .map_err(|_| ClientError::Timeout(self.config.connect_timeout_ms))?
            .map_err(ClientError::Connect)?;
        stream.set_nodelay(true)?;

        info!("connected to manager");
        Ok(FramedStream::new(stream))
    }

    /// Send a request and wait for the reply.
    ///
    /// A failed or timed out exchange drops the connection; the next call
    /// reconnects.
    #[instrument(skip(self, request))]
    pub async fn request<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        request: &Req,
    ) -> Result<Resp, ClientError> {
        let mut conn_guard = self.connection.lock().await;
        let stream = self.stream(&mut conn_guard).await?;

        let timeout = Duration::from_millis(self.config.reply_timeout_ms);
        let result = match tokio::time::timeout(timeout, stream.request(request)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(ClientError::Frame(e)),
            Err(_) => Err(ClientError::ReplyTimeout(self.config.reply_timeout_ms)),
        };

        if result.is_err() {
            warn!("dropping manager connection after failed request");
            *conn_guard = None;
        }
        result
    }

    /// Send a message without waiting for a reply.
    #[instrument(skip(self, message))]
    pub async fn notify<M: Serialize>(&self, message: &M) -> Result<(), ClientError> {
        let mut conn_guard = self.connection.lock().await;
        let stream = self.stream(&mut conn_guard).await?;

        let frame = Frame::notify(message)?;
        if let Err(e) = stream.write_frame(&frame).await {
            *conn_guard = None;
            return Err(e.into());
        }
        Ok(())
    }

    /// Close the connection gracefully
    pub async fn close(&self) {
        let mut conn_guard = self.connection.lock().await;
        self.active.store(false, Ordering::Release);
        if let Some(mut stream) = conn_guard.take()
            && let Err(e) = stream.get_mut().shutdown().await
        {
            debug!(error = %e, "error shutting down manager connection");
        }
    }

    /// Check if the client currently holds an open connection
    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }
}
