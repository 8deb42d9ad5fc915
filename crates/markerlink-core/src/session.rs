//! Capabilities the orchestration layer needs from the real-time session
//! stack.
//!
//! Handlers registered with [`PeerSession::on_track`],
//! [`PeerSession::on_data_channel`] and [`DataChannel::on_message`] run on the
//! session's own tasks. Their bodies must not block those tasks: anything
//! slow belongs in the returned future or in a spawned task.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{SessionError, TrackError};
use crate::types::{Frame, SessionDescription};

/// Label of the side channel the receiver opens for coordinate reports.
pub const SIDE_CHANNEL_LABEL: &str = "chat";

/// Prefix of data channels that carry a media track.
pub const VIDEO_CHANNEL_PREFIX: &str = "video";

pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type TrackHandler = Arc<dyn Fn(Arc<dyn RemoteTrack>) -> HandlerFuture + Send + Sync>;
pub type DataChannelHandler = Arc<dyn Fn(Arc<dyn DataChannel>) -> HandlerFuture + Send + Sync>;
pub type MessageHandler = Arc<dyn Fn(String) -> HandlerFuture + Send + Sync>;

// MARK: - Tracks

/// Outgoing media source. The session pulls frames until it sees
/// [`TrackError::NotLive`].
#[async_trait]
pub trait LocalTrack: Send {
    fn id(&self) -> &str;

    async fn recv(&mut self) -> Result<Frame, TrackError>;
}

/// Inbound media announced by the remote peer.
#[async_trait]
pub trait RemoteTrack: Send + Sync {
    fn id(&self) -> &str;

    /// Waits for the next frame.
    async fn recv(&self) -> Result<Frame, TrackError>;
}

// MARK: - DataChannel

#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Resolves once the session reports the channel open.
    async fn wait_open(&self) -> Result<(), SessionError>;

    async fn send_text(&self, text: &str) -> Result<(), SessionError>;

    fn on_message(&self, handler: MessageHandler);

    async fn close(&self) -> Result<(), SessionError>;
}

// MARK: - PeerSession

#[async_trait]
pub trait PeerSession: Send + Sync {
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, SessionError>;

    async fn add_track(&self, track: Box<dyn LocalTrack>) -> Result<(), SessionError>;

    async fn create_offer(&self) -> Result<SessionDescription, SessionError>;

    async fn create_answer(&self) -> Result<SessionDescription, SessionError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), SessionError>;

    /// The description to hand to the peer, once the local one is applied.
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), SessionError>;

    fn on_track(&self, handler: TrackHandler);

    fn on_data_channel(&self, handler: DataChannelHandler);

    async fn close(&self) -> Result<(), SessionError>;
}
