// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for the manager channel.
//!
//! ```text
//! +-----------------+---------------+-----------------------+
//! | length (u32 BE) | type (u16 BE) | JSON payload (length) |
//! +-----------------+---------------+-----------------------+
//! ```

use std::io::ErrorKind;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted payload (16 MiB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix plus message type
pub const HEADER_SIZE: usize = 6;

/// Kind of frame on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    /// Command that expects a reply
    Request = 1,
    /// Command without a reply
    Notify = 2,
    /// Answer to a request
    Reply = 3,
    /// Request could not be handled
    Error = 4,
}

impl TryFrom<u16> for MessageType {
    type Error = FrameError;

    fn try_from(raw: u16) -> Result<Self, FrameError> {
        [
            MessageType::Request,
            MessageType::Notify,
            MessageType::Reply,
            MessageType::Error,
        ]
            .into_iter()
            .find(|kind| *kind as u16 == raw)
            .ok_or(FrameError::InvalidMessageType(raw))
    }
}

/// Errors raised while reading, writing or decoding frames
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("invalid message type: {0}")]
    InvalidMessageType(u16),

    #[error("unexpected {0:?} frame")]
    UnexpectedMessage(MessageType),

    #[error("peer answered with error: {0}")]
    Remote(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed")]
    ConnectionClosed,
}

fn truncated(what: &str) -> FrameError {
    FrameError::Io(std::io::Error::new(
        ErrorKind::UnexpectedEof,
        format!("incomplete frame {}", what),
    ))
}

#[derive(Debug, Clone, Copy)]
struct Header {
    length: usize,
    message_type: MessageType,
}

impl Header {
    /// Parse the first `HEADER_SIZE` bytes of `raw`.
    fn parse(mut raw: &[u8]) -> Result<Self, FrameError> {
        let length = raw.get_u32() as usize;
        let message_type = MessageType::try_from(raw.get_u16())?;
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(length));
        }
        Ok(Self {
            length,
            message_type,
        })
    }
}

/// One message: its type and JSON payload.
#[derive(Debug, Clone)]
pub struct Frame {
    pub message_type: MessageType,
    pub payload: Bytes,
}

impl Frame {
    pub fn request<M: Serialize>(msg: &M) -> Result<Self, FrameError> {
        Self::new(MessageType::Request, msg)
    }

    pub fn notify<M: Serialize>(msg: &M) -> Result<Self, FrameError> {
        Self::new(MessageType::Notify, msg)
    }

    pub fn reply<M: Serialize>(msg: &M) -> Result<Self, FrameError> {
        Self::new(MessageType::Reply, msg)
    }

    pub fn error<M: Serialize>(msg: &M) -> Result<Self, FrameError> {
        Self::new(MessageType::Error, msg)
    }

    /// Serialize `msg` into a frame of the given type.
    pub fn new<M: Serialize>(message_type: MessageType, msg: &M) -> Result<Self, FrameError> {
        let payload = Bytes::from(serde_json::to_vec(msg)?);
        if payload.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(payload.len()));
        }
        Ok(Self {
            message_type,
            payload,
        })
    }

    /// Deserialize the payload.
    pub fn decode<M: DeserializeOwned>(&self) -> Result<M, FrameError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Header followed by payload, ready to be written.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u32(self.payload.len() as u32);
        buf.put_u16(self.message_type as u16);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Parse one frame from the start of `bytes`. Trailing bytes are ignored.
    pub fn decode_from_bytes(mut bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(truncated("header"));
        }
        let header = Header::parse(&bytes.split_to(HEADER_SIZE))?;
        if bytes.len() < header.length {
            return Err(truncated("payload"));
        }
        Ok(Self {
            message_type: header.message_type,
            payload: bytes.split_to(header.length),
        })
    }
}

/// Write `frame` and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), FrameError> {
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next frame.
///
/// End of stream before a header is reported as [`FrameError::ConnectionClosed`].
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, FrameError> {
    let mut raw = [0u8; HEADER_SIZE];
    if let Err(e) = reader.read_exact(&mut raw).await {
        return Err(match e.kind() {
            ErrorKind::UnexpectedEof => FrameError::ConnectionClosed,
            _ => e.into(),
        });
    }
    let header = Header::parse(&raw)?;

    let mut payload = BytesMut::zeroed(header.length);
    reader.read_exact(&mut payload).await?;
    Ok(Frame {
        message_type: header.message_type,
        payload: payload.freeze(),
    })
}

/// A byte stream carrying frames.
pub struct FramedStream<S> {
    inner: S,
}

impl<S> FramedStream<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> FramedStream<S> {
    pub async fn read_frame(&mut self) -> Result<Frame, FrameError> {
        read_frame(&mut self.inner).await
    }
}

impl<S: AsyncWrite + Unpin> FramedStream<S> {
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), FrameError> {
        write_frame(&mut self.inner, frame).await
    }

    /// Answer a request.
    pub async fn reply<Resp: Serialize>(&mut self, reply: &Resp) -> Result<(), FrameError> {
        self.write_frame(&Frame::reply(reply)?).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedStream<S> {
    /// Send a request and read its reply.
    ///
    /// An `Error` frame from the peer becomes [`FrameError::Remote`].
    pub async fn request<Req, Resp>(&mut self, request: &Req) -> Result<Resp, FrameError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        self.write_frame(&Frame::request(request)?).await?;

        let answer = self.read_frame().await?;
        match answer.message_type {
            MessageType::Reply => answer.decode(),
            MessageType::Error => Err(FrameError::Remote(
                String::from_utf8_lossy(&answer.payload).into_owned(),
            )),
            other => Err(FrameError::UnexpectedMessage(other)),
        }
    }
}
