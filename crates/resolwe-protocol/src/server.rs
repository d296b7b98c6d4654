// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Manager-side listener for executor connections.

use std::future::Future;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, instrument, warn};

use crate::frame::{Frame, FrameError, FramedStream, MessageType};
use crate::messages::{ExecutorCommand, ManagerReply};

/// Errors that can occur in the manager server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bind error: {0}")]
    Bind(std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

/// TCP listener accepting executor connections.
pub struct ManagerServer {
    listener: TcpListener,
}

impl ManagerServer {
    /// Bind to the given address (use port 0 for an ephemeral port)
    pub async fn bind(addr: SocketAddr) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await.map_err(ServerError::Bind)?;
        info!(addr = %listener.local_addr()?, "manager listener bound");
        Ok(Self { listener })
    }

    /// Get the local address the server is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, handling each on its own task.
    ///
    /// The handler is called for every command. Its reply is written back
    /// only for commands sent as requests.
    #[instrument(skip(self, handler))]
    pub async fn run<H, Fut>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(ExecutorCommand) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = ManagerReply> + Send + 'static,
    {
        loop {
            let (stream, remote_addr) = self.listener.accept().await?;
            debug!(%remote_addr, "accepted executor connection");

            let handler = handler.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, handler).await {
                    error!(%remote_addr, error = %e, "executor connection failed");
                }
            });
        }
    }
}

async fn serve_connection<H, Fut>(stream: TcpStream, handler: H) -> Result<(), ServerError>
where
    H: Fn(ExecutorCommand) -> Fut,
    Fut: Future<Output = ManagerReply>,
{
    let mut framed = FramedStream::new(stream);

    loop {
        let frame = match framed.read_frame().await {
            Ok(frame) => frame,
            Err(FrameError::ConnectionClosed) => {
                debug!("executor connection closed");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match frame.message_type {
            MessageType::Request => match frame.decode::<ExecutorCommand>() {
                Ok(command) => {
                    let reply = handler(command).await;
                    framed.reply(&reply).await?;
                }
                Err(e) => {
                    warn!(error = %e, "malformed executor request");
                    let error_frame = Frame::error(&e.to_string())?;
                    framed.write_frame(&error_frame).await?;
                }
            },
            MessageType::Notify => match frame.decode::<ExecutorCommand>() {
                Ok(command) => {
                    handler(command).await;
                }
                Err(e) => warn!(error = %e, "malformed executor notification"),
            },
            other => warn!(message_type = ?other, "unexpected frame from executor"),
        }
    }
}
