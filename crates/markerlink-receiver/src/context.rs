use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use markerlink_core::session::{HandlerFuture, RemoteTrack, TrackHandler};
use markerlink_core::{SessionConfig, SharedCoordinates};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::analysis::WorkItem;
use crate::preview::PreviewWriter;

/// Everything the receiver's handlers share, built once in `main`.
pub struct ReceiverContext {
    pub config: SessionConfig,
    pub coords: SharedCoordinates,
    pub work_tx: mpsc::Sender<WorkItem>,
    pub preview: Option<PreviewWriter>,
    frames_received: AtomicU64,
}

impl ReceiverContext {
    pub fn new(
        config: SessionConfig,
        coords: SharedCoordinates,
        work_tx: mpsc::Sender<WorkItem>,
        preview: Option<PreviewWriter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            coords,
            work_tx,
            preview,
            frames_received: AtomicU64::new(0),
        })
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Pulls one frame from `track` and hands it to analysis and preview.
    pub async fn intake(&self, track: Arc<dyn RemoteTrack>) {
        let frame = match track.recv().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(track = track.id(), "No frame from track: {e}");
                return;
            }
        };
        let arrival = Instant::now();
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        debug!(track = track.id(), pts = frame.pts, "Frame received");

        if let Some(preview) = &self.preview {
            preview.offer(frame.clone());
        }
        if self.work_tx.send(WorkItem::Frame { frame, arrival }).await.is_err() {
            warn!("Analysis queue closed, frame discarded");
        }
    }

    /// `on_track` handler bound to this context.
    pub fn track_handler(self: &Arc<Self>) -> TrackHandler {
        let ctx = Arc::clone(self);
        Arc::new(move |track: Arc<dyn RemoteTrack>| -> HandlerFuture {
            let ctx = Arc::clone(&ctx);
            Box::pin(async move { ctx.intake(track).await })
        })
    }
}

#[cfg(test)]
mod tests {
    use markerlink_core::testing::FakeRemoteTrack;
    use markerlink_core::{Frame, Resolution, SharedCoordinateState, TimeBase};

    use super::*;

    fn frame(pts: u64) -> Frame {
        Frame::bgr(vec![0u8; 12], Resolution::new(2, 2), pts, TimeBase::VIDEO_90KHZ).unwrap()
    }

    #[tokio::test]
    async fn one_frame_per_track_event() {
        let (tx, mut rx) = mpsc::channel(4);
        let ctx = ReceiverContext::new(SessionConfig::default(), SharedCoordinateState::new(), tx, None);
        let track = FakeRemoteTrack::new("video-0", vec![frame(0), frame(3_000)]);

        let announced: Arc<dyn RemoteTrack> = track.clone();
        (ctx.track_handler())(announced).await;

        match rx.try_recv() {
            Ok(WorkItem::Frame { frame, .. }) => assert_eq!(frame.pts, 0),
            _ => panic!("expected a queued frame"),
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(track.remaining(), 1);
        assert_eq!(ctx.frames_received(), 1);
    }

    #[tokio::test]
    async fn ended_track_queues_nothing() {
        let (tx, mut rx) = mpsc::channel(4);
        let ctx = ReceiverContext::new(SessionConfig::default(), SharedCoordinateState::new(), tx, None);

        ctx.intake(FakeRemoteTrack::new("video-1", Vec::new())).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(ctx.frames_received(), 0);
    }
}
