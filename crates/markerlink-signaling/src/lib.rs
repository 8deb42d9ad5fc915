//! markerlink-signaling: carries session descriptions between the two peers
//! before the direct session exists.
//!
//! # Topology
//!
//! ```text
//! markerlink-sender                        markerlink-receiver
//! ─────────────────                        ───────────────────
//! TcpSignaling::listen(host, port) ◄────── TcpSignaling::connect(host, port)
//!        offer  ──────────────────────────►
//!               ◄────────────────────────── answer
//!        bye    ◄─────────────────────────► bye      (sent by close())
//! ```
//!
//! The sender sends first, so it owns the listening socket; the receiver
//! retries its connect until the sender is up.

pub mod tcp;

use async_trait::async_trait;
use markerlink_core::SignalingMessage;
use thiserror::Error;

pub use tcp::{FramedSignaling, MemorySignaling, TcpSignaling, MAX_MESSAGE_BYTES};

#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("Message too large: {len} bytes (max {max})")]
    Oversized { len: usize, max: usize },

    #[error("Malformed signaling message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Signaling connection closed by peer")]
    Closed,

    #[error("Signaling I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SignalingError {
    /// Read errors that leave the stream usable: skip the message and go on.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Oversized { .. } | Self::Malformed(_))
    }
}

/// Reliable, ordered exchange of [`SignalingMessage`]s with the remote peer.
#[async_trait]
pub trait Signaling: Send {
    async fn send(&mut self, message: &SignalingMessage) -> Result<(), SignalingError>;

    async fn receive(&mut self) -> Result<SignalingMessage, SignalingError>;

    /// Says `bye` (best-effort) and shuts the transport down.
    async fn close(&mut self) -> Result<(), SignalingError>;
}
