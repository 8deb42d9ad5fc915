//! Sender-side offer/answer loop.
//!
//! ```text
//! Idle ─► Offering ─► AwaitingAnswer ──answer──► Connected
//!            ▲                                      │
//!            └──────── Renegotiating ◄──────────────┘
//!                 (delay, move marker, fresh track)
//!
//! bye from any state ─► Closed
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use markerlink_core::session::{DataChannel, DataChannelHandler, HandlerFuture, PeerSession};
use markerlink_core::side_channel::{self, SideChannelMessage};
use markerlink_core::{
    MarkerPosition, SdpKind, SessionConfig, SessionDescription, SessionError, SignalingMessage,
};
use markerlink_signaling::Signaling;
use tracing::{debug, info, warn};

use crate::track::{MarkerTrack, TrackHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    Offering,
    AwaitingAnswer,
    Connected,
    Renegotiating,
    Closed,
}

pub struct SenderNegotiator<S> {
    session: Arc<dyn PeerSession>,
    signaling: S,
    config: SessionConfig,
    state: SenderState,
    position: MarkerPosition,
    current_track: Option<TrackHandle>,
    tracks_added: u32,
    rounds: u64,
    reports: Arc<AtomicU64>,
}

impl<S: Signaling> SenderNegotiator<S> {
    pub fn new(session: Arc<dyn PeerSession>, signaling: S, config: SessionConfig) -> Self {
        let position = config.marker.start;
        Self {
            session,
            signaling,
            config,
            state: SenderState::Idle,
            position,
            current_track: None,
            tracks_added: 0,
            rounds: 0,
            reports: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn position(&self) -> MarkerPosition {
        self.position
    }

    /// Answers applied so far.
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Coordinate reports received on the side channel.
    pub fn reports(&self) -> u64 {
        self.reports.load(Ordering::Relaxed)
    }

    fn transition(&mut self, next: SenderState) {
        debug!(from = ?self.state, to = ?next, "Sender state");
        self.state = next;
    }

    /// Sends the first offer, then services signaling until `bye` or a fatal
    /// error.
    pub async fn run(&mut self) -> Result<()> {
        self.session.on_data_channel(side_channel_logger(Arc::clone(&self.reports)));
        self.offer().await?;

        loop {
            match self.signaling.receive().await {
                Ok(SignalingMessage::Description(desc)) => self.handle_description(desc).await?,
                Ok(SignalingMessage::Bye) => {
                    info!("Receiver said bye");
                    self.transition(SenderState::Closed);
                    return Ok(());
                }
                Err(e) if e.is_recoverable() => {
                    warn!("Skipping signaling message: {e}");
                    continue;
                }
                Err(e) => return Err(e).context("signaling receive failed"),
            }

            if self.state == SenderState::Connected {
                self.renegotiate().await?;
            }
        }
    }

    async fn handle_description(&mut self, desc: SessionDescription) -> Result<()> {
        match (desc.kind, self.state) {
            (SdpKind::Answer, SenderState::AwaitingAnswer) => {
                self.session
                    .set_remote_description(desc)
                    .await
                    .context("applying answer")?;
                self.rounds += 1;
                info!(round = self.rounds, position = ?self.position, "Answer applied");
                self.transition(SenderState::Connected);
            }
            (SdpKind::Answer, state) => warn!(?state, "Answer with no pending offer, ignoring"),
            (SdpKind::Offer, _) => warn!("Sender does not accept offers, ignoring"),
        }
        Ok(())
    }

    async fn renegotiate(&mut self) -> Result<()> {
        self.transition(SenderState::Renegotiating);
        tokio::time::sleep(self.config.negotiation.renegotiation_delay()).await;
        let extent = self.config.stream.resolution.height as i32;
        self.position.advance(self.config.marker.step, extent);
        self.offer().await
    }

    /// Swaps in a fresh marker track at the current position and offers it.
    async fn offer(&mut self) -> Result<()> {
        self.transition(SenderState::Offering);

        if let Some(previous) = self.current_track.take() {
            debug!(track = previous.id(), "Stopping previous track");
            previous.stop();
        }
        let id = format!("marker-{}", self.tracks_added);
        self.tracks_added += 1;
        let (track, handle) = MarkerTrack::new(id, &self.config, self.position);
        self.session.add_track(Box::new(track)).await.context("adding marker track")?;
        self.current_track = Some(handle);

        let offer = self.session.create_offer().await.context("creating offer")?;
        self.session
            .set_local_description(offer)
            .await
            .context("applying local offer")?;
        let local = self
            .session
            .local_description()
            .await
            .ok_or(SessionError::NoLocalDescription)?;
        self.signaling
            .send(&SignalingMessage::Description(local))
            .await
            .context("sending offer")?;

        self.transition(SenderState::AwaitingAnswer);
        Ok(())
    }

    /// Stops the live track, then closes the session and signaling. Failures
    /// are logged, never returned.
    pub async fn close(&mut self) {
        if let Some(track) = self.current_track.take() {
            track.stop();
        }
        if let Err(e) = self.session.close().await {
            warn!("Closing peer session: {e}");
        }
        if let Err(e) = self.signaling.close().await {
            debug!("Closing signaling: {e}");
        }
        self.transition(SenderState::Closed);
        info!(
            rounds = self.rounds,
            tracks = self.tracks_added,
            reports = self.reports(),
            "Sender session finished"
        );
    }
}

// ── Side channel ─────────────────────────────────────────────────────────────

fn side_channel_logger(reports: Arc<AtomicU64>) -> DataChannelHandler {
    Arc::new(move |channel: Arc<dyn DataChannel>| -> HandlerFuture {
        let reports = Arc::clone(&reports);
        Box::pin(async move {
            let label = channel.label().to_owned();
            info!(channel = %label, "Side channel announced by receiver");
            channel.on_message(Arc::new(move |text: String| -> HandlerFuture {
                log_side_channel(&label, &text, &reports);
                Box::pin(async {})
            }));
        })
    })
}

fn log_side_channel(label: &str, text: &str, reports: &AtomicU64) {
    match side_channel::decode(text) {
        Ok(SideChannelMessage::Heartbeat(beat)) => debug!(channel = %label, "{beat}"),
        Ok(SideChannelMessage::Coordinates(coords)) => {
            reports.fetch_add(1, Ordering::Relaxed);
            info!(channel = %label, x = coords.x, y = coords.y, "Receiver located marker at {coords}");
        }
        Err(e) => warn!(channel = %label, "Unreadable side-channel message {text:?}: {e}"),
    }
}
