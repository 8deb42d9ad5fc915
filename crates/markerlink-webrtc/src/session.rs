use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use markerlink_core::SessionConfig;
use markerlink_core::session::{
    DataChannel, DataChannelHandler, LocalTrack, PeerSession, TrackHandler, VIDEO_CHANNEL_PREFIX,
};
use markerlink_core::{SdpKind, SessionDescription, SessionError};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::channel::RtcDataChannel;
use crate::track::{pump, RtcRemoteTrack};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn negotiation(e: impl std::fmt::Display) -> SessionError {
    SessionError::Negotiation { reason: e.to_string() }
}

pub(crate) fn build_api() -> Result<API, SessionError> {
    let mut media = MediaEngine::default();
    media.register_default_codecs().map_err(negotiation)?;
    let registry = register_default_interceptors(Registry::new(), &mut media).map_err(negotiation)?;
    Ok(APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .build())
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, SessionError> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    }
    .map_err(negotiation)
}

fn from_rtc(desc: RTCSessionDescription) -> Option<SessionDescription> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        other => {
            warn!("Ignoring local description of type {other}");
            return None;
        }
    };
    Some(SessionDescription { kind, sdp: desc.sdp })
}

type Slot<T> = Arc<Mutex<Option<T>>>;

/// One `RTCPeerConnection` plus the handler slots the negotiators fill.
pub struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
    track_handler: Slot<TrackHandler>,
    channel_handler: Slot<DataChannelHandler>,
    next_track: AtomicU32,
    open_timeout: Duration,
}

impl WebRtcSession {
    /// Uses `ice` for servers, `stream.frame_buffer` to bound each inbound
    /// track and `negotiation.channel_open_timeout` for outbound track
    /// channels.
    pub async fn new(config: &SessionConfig) -> Result<Arc<Self>, SessionError> {
        let api = build_api()?;
        let frame_buffer = config.stream.frame_buffer;
        let ice_servers = if config.ice.urls.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer { urls: config.ice.urls.clone(), ..Default::default() }]
        };
        let rtc_config = RTCConfiguration { ice_servers, ..Default::default() };
        let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(negotiation)?);

        pc.on_peer_connection_state_change(Box::new(|state: RTCPeerConnectionState| {
            match state {
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected => {
                    warn!("Peer connection {state}")
                }
                _ => info!("Peer connection {state}"),
            }
            Box::pin(async {})
        }));

        let track_handler: Slot<TrackHandler> = Arc::default();
        let channel_handler: Slot<DataChannelHandler> = Arc::default();
        {
            let track_handler = Arc::clone(&track_handler);
            let channel_handler = Arc::clone(&channel_handler);
            pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                route_inbound(&dc, frame_buffer, &track_handler, &channel_handler);
                Box::pin(async {})
            }));
        }

        Ok(Arc::new(Self {
            pc,
            track_handler,
            channel_handler,
            next_track: AtomicU32::new(0),
            open_timeout: config.negotiation.channel_open_timeout(),
        }))
    }
}

/// Surfaces a remote channel as a track or side-channel event. Handlers run
/// on their own task so they can await session calls freely; the channel's
/// message listener is attached here, before webrtc starts reading.
fn route_inbound(
    dc: &Arc<RTCDataChannel>,
    frame_buffer: usize,
    track_handler: &Slot<TrackHandler>,
    channel_handler: &Slot<DataChannelHandler>,
) {
    let label = dc.label().to_owned();
    if label.starts_with(VIDEO_CHANNEL_PREFIX) {
        let track = RtcRemoteTrack::attach(dc, frame_buffer);
        match lock(track_handler).clone() {
            Some(handler) => {
                debug!(track = %label, "Inbound track");
                tokio::spawn(handler(track));
            }
            None => debug!(track = %label, "Inbound track with no handler"),
        }
    } else {
        let channel = RtcDataChannel::wrap(Arc::clone(dc));
        match lock(channel_handler).clone() {
            Some(handler) => {
                debug!(channel = %label, "Inbound data channel");
                tokio::spawn(handler(channel));
            }
            None => debug!(channel = %label, "Inbound data channel with no handler"),
        }
    }
}

#[async_trait]
impl PeerSession for WebRtcSession {
    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, SessionError> {
        let dc = self.pc.create_data_channel(label, None).await.map_err(negotiation)?;
        Ok(RtcDataChannel::wrap(dc))
    }

    async fn add_track(&self, track: Box<dyn LocalTrack>) -> Result<(), SessionError> {
        let n = self.next_track.fetch_add(1, Ordering::Relaxed);
        let label = format!("{VIDEO_CHANNEL_PREFIX}-{n}");
        let dc = self.pc.create_data_channel(&label, None).await.map_err(negotiation)?;
        debug!(channel = %label, track = track.id(), "Track added");
        tokio::spawn(pump(track, RtcDataChannel::wrap(dc), self.open_timeout));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, SessionError> {
        let offer = self.pc.create_offer(None).await.map_err(negotiation)?;
        Ok(SessionDescription { kind: SdpKind::Offer, sdp: offer.sdp })
    }

    async fn create_answer(&self) -> Result<SessionDescription, SessionError> {
        let answer = self.pc.create_answer(None).await.map_err(negotiation)?;
        Ok(SessionDescription { kind: SdpKind::Answer, sdp: answer.sdp })
    }

    /// Applies `desc` and waits for ICE gathering, so the description handed
    /// out afterwards carries every candidate.
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), SessionError> {
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(to_rtc(desc)?).await.map_err(negotiation)?;
        let _ = gathered.recv().await;
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc.local_description().await.and_then(from_rtc)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), SessionError> {
        self.pc.set_remote_description(to_rtc(desc)?).await.map_err(negotiation)
    }

    fn on_track(&self, handler: TrackHandler) {
        *lock(&self.track_handler) = Some(handler);
    }

    fn on_data_channel(&self, handler: DataChannelHandler) {
        *lock(&self.channel_handler) = Some(handler);
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.pc.close().await.map_err(negotiation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_sdp_types_have_no_local_description() {
        let mut desc = RTCSessionDescription::default();
        desc.sdp_type = RTCSdpType::Rollback;
        assert!(from_rtc(desc).is_none());
    }

    fn offline_config() -> SessionConfig {
        let mut config = SessionConfig::default();
        config.ice.urls.clear();
        config
    }

    #[tokio::test]
    async fn offer_carries_track_channels() {
        let session = WebRtcSession::new(&offline_config()).await.unwrap();
        session.create_data_channel("probe").await.unwrap();

        let offer = session.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(offer.sdp.contains("m=application"));

        session.set_local_description(offer).await.unwrap();
        let local = session.local_description().await.unwrap();
        assert_eq!(local.kind, SdpKind::Offer);
        session.close().await.unwrap();
    }
}
