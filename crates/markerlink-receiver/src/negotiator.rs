//! Receiver-side answer loop.
//!
//! ```text
//! Idle ─► AwaitingOffer ─offer─► Answering ─► Connected ─offer─► Answering ...
//!                                                 │
//!                                   first time only: wait for the side
//!                                   channel to open, send coordinates
//!
//! bye from any state ─► Closed
//! ```

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use markerlink_core::session::{DataChannel, PeerSession, SIDE_CHANNEL_LABEL};
use markerlink_core::side_channel;
use markerlink_core::{SdpKind, SessionDescription, SessionError, SignalingMessage};
use markerlink_signaling::Signaling;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::ReceiverContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    AwaitingOffer,
    Answering,
    Connected,
    Closed,
}

pub struct ReceiverNegotiator<S> {
    ctx: Arc<ReceiverContext>,
    session: Arc<dyn PeerSession>,
    signaling: S,
    state: ReceiverState,
    side_channel: Option<Arc<dyn DataChannel>>,
    coordinates_sent: bool,
    rounds: u64,
    heartbeat: Option<JoinHandle<()>>,
}

impl<S: Signaling> ReceiverNegotiator<S> {
    pub fn new(ctx: Arc<ReceiverContext>, session: Arc<dyn PeerSession>, signaling: S) -> Self {
        Self {
            ctx,
            session,
            signaling,
            state: ReceiverState::Idle,
            side_channel: None,
            coordinates_sent: false,
            rounds: 0,
            heartbeat: None,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Offers answered so far.
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    pub fn coordinates_sent(&self) -> bool {
        self.coordinates_sent
    }

    fn transition(&mut self, next: ReceiverState) {
        debug!(from = ?self.state, to = ?next, "Receiver state");
        self.state = next;
    }

    /// Opens the side channel, then answers offers until `bye` or a fatal
    /// error.
    pub async fn run(&mut self) -> Result<()> {
        self.session.on_track(self.ctx.track_handler());
        let channel = self
            .session
            .create_data_channel(SIDE_CHANNEL_LABEL)
            .await
            .context("creating side channel")?;
        self.side_channel = Some(channel);
        self.transition(ReceiverState::AwaitingOffer);

        loop {
            match self.signaling.receive().await {
                Ok(SignalingMessage::Description(desc)) => match desc.kind {
                    SdpKind::Offer => self.answer(desc).await?,
                    SdpKind::Answer => warn!(state = ?self.state, "Receiver does not accept answers, ignoring"),
                },
                Ok(SignalingMessage::Bye) => {
                    info!("Sender said bye");
                    self.transition(ReceiverState::Closed);
                    return Ok(());
                }
                Err(e) if e.is_recoverable() => warn!("Skipping signaling message: {e}"),
                Err(e) => return Err(e).context("signaling receive failed"),
            }
        }
    }

    async fn answer(&mut self, offer: SessionDescription) -> Result<()> {
        self.transition(ReceiverState::Answering);
        self.session
            .set_remote_description(offer)
            .await
            .context("applying offer")?;
        let answer = self.session.create_answer().await.context("creating answer")?;
        self.session
            .set_local_description(answer)
            .await
            .context("applying local answer")?;
        let local = self
            .session
            .local_description()
            .await
            .ok_or(SessionError::NoLocalDescription)?;
        self.signaling
            .send(&SignalingMessage::Description(local))
            .await
            .context("sending answer")?;

        self.rounds += 1;
        info!(round = self.rounds, "Answer sent");
        self.transition(ReceiverState::Connected);

        if !self.coordinates_sent {
            self.report_coordinates().await;
        }
        Ok(())
    }

    /// Sends the current coordinates once the side channel is open. A failed
    /// attempt is retried on the next round.
    async fn report_coordinates(&mut self) {
        let Some(channel) = self.side_channel.clone() else {
            return;
        };
        let timeout = self.ctx.config.negotiation.channel_open_timeout();
        match tokio::time::timeout(timeout, channel.wait_open()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(channel = channel.label(), "Side channel unavailable: {e}");
                return;
            }
            Err(_) => {
                warn!(channel = channel.label(), ?timeout, "Side channel did not open in time");
                return;
            }
        }

        let coords = self.ctx.coords.load();
        let text = match side_channel::encode_coordinates(coords) {
            Ok(text) => text,
            Err(e) => {
                warn!("Encoding coordinates: {e}");
                return;
            }
        };
        match channel.send_text(&text).await {
            Ok(()) => {
                info!(channel = channel.label(), "Reported marker at {coords}");
                self.coordinates_sent = true;
                self.start_heartbeat(channel);
            }
            Err(e) => warn!("Sending coordinates: {e}"),
        }
    }

    fn start_heartbeat(&mut self, channel: Arc<dyn DataChannel>) {
        let Some(period) = self.ctx.config.negotiation.heartbeat_interval() else {
            return;
        };
        let started = Instant::now();
        self.heartbeat = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let beat = side_channel::heartbeat(started.elapsed().as_millis() as u64);
                if let Err(e) = channel.send_text(&beat).await {
                    debug!("Heartbeat stopped: {e}");
                    break;
                }
            }
        }));
    }

    /// Closes the session and signaling. Failures are logged, never returned.
    pub async fn close(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        if let Err(e) = self.session.close().await {
            warn!("Closing peer session: {e}");
        }
        if let Err(e) = self.signaling.close().await {
            debug!("Closing signaling: {e}");
        }
        self.transition(ReceiverState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use markerlink_core::testing::{FakeRemoteTrack, FakeSession};
    use markerlink_core::{
        Coordinates, Frame, Resolution, SessionConfig, SharedCoordinateState, TimeBase,
    };
    use markerlink_signaling::MemorySignaling;
    use tokio::sync::mpsc;

    use super::*;
    use crate::analysis::WorkItem;

    fn context(config: SessionConfig) -> (Arc<ReceiverContext>, mpsc::Receiver<WorkItem>) {
        let (tx, rx) = mpsc::channel(8);
        let coords = SharedCoordinateState::new();
        coords.store(Coordinates::new(7, 42));
        (ReceiverContext::new(config, coords, tx, None), rx)
    }

    async fn offer(peer: &mut MemorySignaling, sdp: &str) -> SessionDescription {
        peer.send(&SignalingMessage::Description(SessionDescription::offer(sdp)))
            .await
            .unwrap();
        match peer.receive().await.unwrap() {
            SignalingMessage::Description(desc) if desc.kind == SdpKind::Answer => desc,
            other => panic!("expected answer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn coordinates_are_sent_once_across_renegotiations() {
        let (ctx, _rx) = context(SessionConfig::default());
        let session = FakeSession::new();
        let (ours, mut peer) = MemorySignaling::pair();
        let mut neg = ReceiverNegotiator::new(ctx, session.clone(), ours);
        let task = tokio::spawn(async move {
            let result = neg.run().await;
            (neg, result)
        });

        assert_eq!(offer(&mut peer, "o0").await.sdp, "fake-answer-0");
        assert_eq!(offer(&mut peer, "o1").await.sdp, "fake-answer-1");
        assert_eq!(offer(&mut peer, "o2").await.sdp, "fake-answer-2");
        peer.send(&SignalingMessage::Bye).await.unwrap();

        let (neg, result) = task.await.unwrap();
        result.unwrap();
        assert_eq!(neg.state(), ReceiverState::Closed);
        assert_eq!(neg.rounds(), 3);
        assert!(neg.coordinates_sent());

        let channels = session.channels();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].label(), "chat");
        assert_eq!(channels[0].sent(), vec![r#"{"x": 7, "y": 42}"#.to_owned()]);
        assert_eq!(session.remote_descriptions().len(), 3);
    }

    #[tokio::test]
    async fn answers_are_ignored() {
        let (ctx, _rx) = context(SessionConfig::default());
        let session = FakeSession::new();
        let (ours, mut peer) = MemorySignaling::pair();
        let mut neg = ReceiverNegotiator::new(ctx, session.clone(), ours);
        let task = tokio::spawn(async move {
            let result = neg.run().await;
            (neg, result)
        });

        peer.send(&SignalingMessage::Description(SessionDescription::answer("stray")))
            .await
            .unwrap();
        offer(&mut peer, "o0").await;
        peer.send(&SignalingMessage::Bye).await.unwrap();

        let (neg, result) = task.await.unwrap();
        result.unwrap();
        assert_eq!(neg.rounds(), 1);
        assert_eq!(session.remote_descriptions(), vec![SessionDescription::offer("o0")]);
    }

    #[tokio::test]
    async fn inbound_track_feeds_the_work_queue() {
        let (ctx, mut rx) = context(SessionConfig::default());
        let session = FakeSession::new();
        let (ours, mut peer) = MemorySignaling::pair();
        let mut neg = ReceiverNegotiator::new(ctx, session.clone(), ours);
        let task = tokio::spawn(async move { neg.run().await });
        offer(&mut peer, "o0").await;

        let frame = Frame::bgr(vec![0u8; 3], Resolution::new(1, 1), 6_000, TimeBase::VIDEO_90KHZ).unwrap();
        session.emit_track(FakeRemoteTrack::new("video-0", vec![frame])).await;
        match rx.recv().await {
            Some(WorkItem::Frame { frame, .. }) => assert_eq!(frame.pts, 6_000),
            _ => panic!("expected a frame"),
        }

        peer.send(&SignalingMessage::Bye).await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_follow_the_coordinates() {
        let mut config = SessionConfig::default();
        config.negotiation.heartbeat_interval_ms = Some(10);
        let (ctx, _rx) = context(config);
        let session = FakeSession::new();
        let (ours, mut peer) = MemorySignaling::pair();
        let mut neg = ReceiverNegotiator::new(ctx, session.clone(), ours);
        let task = tokio::spawn(async move {
            let result = neg.run().await;
            (neg, result)
        });

        offer(&mut peer, "o0").await;
        tokio::time::sleep(Duration::from_millis(35)).await;
        peer.send(&SignalingMessage::Bye).await.unwrap();
        let (mut neg, result) = task.await.unwrap();
        result.unwrap();
        neg.close().await;

        let sent = session.channels()[0].sent();
        assert_eq!(sent[0], r#"{"x": 7, "y": 42}"#);
        assert!(sent.len() >= 3, "sent {sent:?}");
        assert!(sent[1..].iter().all(|m| side_channel::is_heartbeat(m)));
        assert!(session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn late_side_channel_gets_the_coordinates_next_round() {
        let mut config = SessionConfig::default();
        config.negotiation.channel_open_timeout_ms = 100;
        let (ctx, _rx) = context(config);
        let session = FakeSession::new();
        session.create_closed_channels();
        let (ours, mut peer) = MemorySignaling::pair();
        let mut neg = ReceiverNegotiator::new(ctx, session.clone(), ours);
        let task = tokio::spawn(async move {
            let result = neg.run().await;
            (neg, result)
        });

        offer(&mut peer, "o0").await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        let chat = session.channels()[0].clone();
        assert!(chat.sent().is_empty());

        chat.set_open(true);
        offer(&mut peer, "o1").await;
        offer(&mut peer, "o2").await;
        assert_eq!(chat.sent(), vec![r#"{"x": 7, "y": 42}"#.to_owned()]);

        peer.send(&SignalingMessage::Bye).await.unwrap();
        let (neg, result) = task.await.unwrap();
        result.unwrap();
        assert_eq!(neg.rounds(), 3);
        assert!(neg.coordinates_sent());
    }

    #[tokio::test]
    async fn lost_signaling_is_fatal() {
        let (ctx, _rx) = context(SessionConfig::default());
        let (ours, peer) = MemorySignaling::pair();
        let mut neg = ReceiverNegotiator::new(ctx, FakeSession::new(), ours);
        drop(peer);
        assert!(neg.run().await.is_err());
    }
}
