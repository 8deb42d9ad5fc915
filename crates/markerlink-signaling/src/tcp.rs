//! Plain TCP signaling with length-prefixed JSON frames.
//!
//! # Framing
//!
//! ```text
//! ┌──────────────┬─────────────────────────────────────────┐
//! │ len: u32 BE  │ JSON body (len bytes)                   │
//! └──────────────┴─────────────────────────────────────────┘
//!   {"type":"offer","sdp":"v=0..."}   {"type":"bye"}
//! ```
//!
//! Bodies above [`MAX_MESSAGE_BYTES`] are read off the wire and discarded so
//! the next frame still starts on a length prefix.

use std::time::Duration;

use async_trait::async_trait;
use markerlink_core::{SdpKind, SessionDescription, SignalingMessage};
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::{Signaling, SignalingError};

/// Largest accepted frame body.
pub const MAX_MESSAGE_BYTES: usize = 1_048_576;

const MEMORY_PIPE_BYTES: usize = 64 * 1024;

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub(crate) enum MessageType {
    Offer,
    Answer,
    Bye,
}

#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct WireMessage {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
}

impl From<&SignalingMessage> for WireMessage {
    fn from(message: &SignalingMessage) -> Self {
        match message {
            SignalingMessage::Description(desc) => Self {
                msg_type: match desc.kind {
                    SdpKind::Offer => MessageType::Offer,
                    SdpKind::Answer => MessageType::Answer,
                },
                sdp: Some(desc.sdp.clone()),
            },
            SignalingMessage::Bye => Self { msg_type: MessageType::Bye, sdp: None },
        }
    }
}

impl TryFrom<WireMessage> for SignalingMessage {
    type Error = SignalingError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let kind = match wire.msg_type {
            MessageType::Bye => return Ok(SignalingMessage::Bye),
            MessageType::Offer => SdpKind::Offer,
            MessageType::Answer => SdpKind::Answer,
        };
        let sdp = wire
            .sdp
            .ok_or_else(|| serde_json::Error::missing_field("sdp"))?;
        Ok(SignalingMessage::Description(SessionDescription { kind, sdp }))
    }
}

// ── Length-prefixed framing ──────────────────────────────────────────────────

async fn write_msg(
    stream: &mut (impl AsyncWriteExt + Unpin),
    msg: &WireMessage,
) -> Result<(), SignalingError> {
    let json = serde_json::to_vec(msg)?;
    let len = json.len() as u32;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&json).await?;
    stream.flush().await?;
    debug!("Sent {:?} ({} bytes)", msg.msg_type, json.len());
    Ok(())
}

async fn read_msg(stream: &mut (impl AsyncReadExt + Unpin)) -> Result<WireMessage, SignalingError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.map_err(eof_as_closed)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_BYTES {
        let drained = tokio::io::copy(&mut (&mut *stream).take(len as u64), &mut tokio::io::sink()).await?;
        if drained < len as u64 {
            return Err(SignalingError::Closed);
        }
        return Err(SignalingError::Oversized { len, max: MAX_MESSAGE_BYTES });
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.map_err(eof_as_closed)?;
    let msg: WireMessage = serde_json::from_slice(&body)?;
    debug!("Received {:?} ({} bytes)", msg.msg_type, len);
    Ok(msg)
}

fn eof_as_closed(e: std::io::Error) -> SignalingError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        SignalingError::Closed
    } else {
        SignalingError::Io(e)
    }
}

// ── FramedSignaling ──────────────────────────────────────────────────────────

/// [`Signaling`] over any byte stream.
pub struct FramedSignaling<S> {
    stream: S,
    closed: bool,
}

pub type TcpSignaling = FramedSignaling<TcpStream>;

/// In-process pair used by tests and single-binary demos.
pub type MemorySignaling = FramedSignaling<DuplexStream>;

impl<S> FramedSignaling<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self { stream, closed: false }
    }
}

impl TcpSignaling {
    /// Binds `host:port` and waits for exactly one peer.
    pub async fn listen(host: &str, port: u16) -> Result<Self, SignalingError> {
        let listener = TcpListener::bind((host, port)).await?;
        info!("Signaling listening on {}", listener.local_addr()?);
        let (stream, peer) = listener.accept().await?;
        stream.set_nodelay(true)?;
        info!("Signaling peer connected from {peer}");
        Ok(Self::new(stream))
    }

    /// Connects to `host:port`, retrying while the listener is not up yet.
    pub async fn connect(
        host: &str,
        port: u16,
        retries: u32,
        interval: Duration,
    ) -> Result<Self, SignalingError> {
        let mut attempt = 0u32;
        loop {
            match TcpStream::connect((host, port)).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    info!("Signaling connected to {host}:{port}");
                    return Ok(Self::new(stream));
                }
                Err(e) if attempt < retries => {
                    attempt += 1;
                    debug!("Signaling connect attempt {attempt}/{retries} failed: {e}");
                    tokio::time::sleep(interval).await;
                }
                Err(e) => {
                    warn!("Signaling connect to {host}:{port} gave up after {attempt} retries");
                    return Err(e.into());
                }
            }
        }
    }
}

impl MemorySignaling {
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(MEMORY_PIPE_BYTES);
        (Self::new(a), Self::new(b))
    }
}

#[async_trait]
impl<S> Signaling for FramedSignaling<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: &SignalingMessage) -> Result<(), SignalingError> {
        if self.closed {
            return Err(SignalingError::Closed);
        }
        write_msg(&mut self.stream, &WireMessage::from(message)).await
    }

    async fn receive(&mut self) -> Result<SignalingMessage, SignalingError> {
        if self.closed {
            return Err(SignalingError::Closed);
        }
        read_msg(&mut self.stream).await?.try_into()
    }

    async fn close(&mut self) -> Result<(), SignalingError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let bye = WireMessage::from(&SignalingMessage::Bye);
        if let Err(e) = write_msg(&mut self.stream, &bye).await {
            debug!("Could not say bye: {e}");
        }
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write_raw(stream: &mut DuplexStream, body: &[u8]) {
        stream.write_all(&(body.len() as u32).to_be_bytes()).await.unwrap();
        stream.write_all(body).await.unwrap();
    }

    #[tokio::test]
    async fn offer_and_answer_cross_the_pipe() {
        let (mut sender, mut receiver) = MemorySignaling::pair();

        let offer = SignalingMessage::Description(SessionDescription::offer("v=0 offer"));
        sender.send(&offer).await.unwrap();
        assert_eq!(receiver.receive().await.unwrap(), offer);

        let answer = SignalingMessage::Description(SessionDescription::answer("v=0 answer"));
        receiver.send(&answer).await.unwrap();
        assert_eq!(sender.receive().await.unwrap(), answer);
    }

    #[tokio::test]
    async fn wire_format_matches_json_shape() {
        let (a, mut raw) = tokio::io::duplex(MEMORY_PIPE_BYTES);
        let mut framed = FramedSignaling::new(a);
        framed
            .send(&SignalingMessage::Description(SessionDescription::offer("x")))
            .await
            .unwrap();

        let mut len = [0u8; 4];
        raw.read_exact(&mut len).await.unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
        raw.read_exact(&mut body).await.unwrap();
        assert_eq!(body, br#"{"type":"offer","sdp":"x"}"#);
    }

    #[tokio::test]
    async fn malformed_frame_is_recoverable() {
        let (a, mut raw) = tokio::io::duplex(MEMORY_PIPE_BYTES);
        let mut framed = FramedSignaling::new(a);

        write_raw(&mut raw, b"not json").await;
        write_raw(&mut raw, br#"{"type":"answer"}"#).await;
        write_raw(&mut raw, br#"{"type":"answer","sdp":"ok"}"#).await;

        let err = framed.receive().await.unwrap_err();
        assert!(err.is_recoverable(), "got {err:?}");
        let err = framed.receive().await.unwrap_err();
        assert!(matches!(err, SignalingError::Malformed(_)));
        assert_eq!(
            framed.receive().await.unwrap(),
            SignalingMessage::Description(SessionDescription::answer("ok"))
        );
    }

    #[tokio::test]
    async fn oversized_frame_is_skipped() {
        let (a, mut raw) = tokio::io::duplex(4 * MAX_MESSAGE_BYTES);
        let mut framed = FramedSignaling::new(a);

        let big = vec![b' '; MAX_MESSAGE_BYTES + 1];
        let writer = tokio::spawn(async move {
            write_raw(&mut raw, &big).await;
            write_raw(&mut raw, br#"{"type":"bye"}"#).await;
            raw
        });

        let err = framed.receive().await.unwrap_err();
        assert!(matches!(err, SignalingError::Oversized { len, .. } if len == MAX_MESSAGE_BYTES + 1));
        assert!(err.is_recoverable());
        assert_eq!(framed.receive().await.unwrap(), SignalingMessage::Bye);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn close_says_bye_then_peer_sees_eof() {
        let (mut a, mut b) = MemorySignaling::pair();
        a.close().await.unwrap();
        a.close().await.unwrap();

        assert_eq!(b.receive().await.unwrap(), SignalingMessage::Bye);
        let err = b.receive().await.unwrap_err();
        assert!(matches!(err, SignalingError::Closed));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (mut a, _b) = MemorySignaling::pair();
        a.close().await.unwrap();
        assert!(matches!(a.send(&SignalingMessage::Bye).await, Err(SignalingError::Closed)));
    }
}
