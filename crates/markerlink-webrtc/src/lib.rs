//! markerlink-webrtc: [`PeerSession`](markerlink_core::PeerSession) on top of
//! the `webrtc` crate.
//!
//! Media is not sent as RTP. Each local track gets its own data channel
//! labelled `video-<n>`; every frame travels as one binary message:
//!
//! ```text
//! ┌──────────┬─────────┬─────────┬─────────┬──────────┬───────────────────┐
//! │ pts: u64 │ tb num  │ tb den  │ width   │ height   │ PNG (RGB8) body   │
//! │          │ u32     │ u32     │ u32     │ u32      │                   │
//! └──────────┴─────────┴─────────┴─────────┴──────────┴───────────────────┘
//!   all big-endian; 24 header bytes
//! ```
//!
//! The remote end turns `video-*` channels into inbound track events and
//! every other channel into a side-channel event.

pub mod channel;
pub mod codec;
pub mod session;
pub mod track;

pub use channel::RtcDataChannel;
pub use session::WebRtcSession;
pub use track::RtcRemoteTrack;
