use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use markerlink_core::config::MarkerConfig;
use markerlink_core::session::LocalTrack;
use markerlink_core::{
    Frame, MarkerPosition, Resolution, SessionConfig, TrackError, BGR_BYTES_PER_PIXEL,
};

use crate::pacer::FramePacer;

/// Paints a filled disc on a black BGR24 canvas. Parts outside the canvas are
/// clipped.
pub fn render_marker(resolution: Resolution, center: MarkerPosition, marker: &MarkerConfig) -> Vec<u8> {
    let (w, h) = (resolution.width as i64, resolution.height as i64);
    let mut canvas = vec![0u8; resolution.total_pixels() as usize * BGR_BYTES_PER_PIXEL];
    let r = marker.radius as i64;
    let (cx, cy) = (center.x as i64, center.y as i64);

    for y in (cy - r).max(0)..=(cy + r).min(h - 1) {
        for x in (cx - r).max(0)..=(cx + r).min(w - 1) {
            let (dx, dy) = (x - cx, y - cy);
            if dx * dx + dy * dy <= r * r {
                let offset = (y * w + x) as usize * BGR_BYTES_PER_PIXEL;
                canvas[offset..offset + BGR_BYTES_PER_PIXEL].copy_from_slice(&marker.color_bgr);
            }
        }
    }
    canvas
}

/// Stops the [`MarkerTrack`] it was created with. Dropping the handle does not.
#[derive(Debug, Clone)]
pub struct TrackHandle {
    id: String,
    live: Arc<AtomicBool>,
}

impl TrackHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stop(&self) {
        self.live.store(false, Ordering::Release);
    }
}

/// Synthetic video: the same marker frame, re-stamped at the pacer's rate.
pub struct MarkerTrack {
    id: String,
    canvas: Bytes,
    resolution: Resolution,
    pacer: FramePacer,
}

impl MarkerTrack {
    pub fn new(id: String, config: &SessionConfig, position: MarkerPosition) -> (Self, TrackHandle) {
        let live = Arc::new(AtomicBool::new(true));
        let resolution = config.stream.resolution;
        let track = Self {
            id: id.clone(),
            canvas: Bytes::from(render_marker(resolution, position, &config.marker)),
            resolution,
            pacer: FramePacer::new(&config.stream, Arc::clone(&live)),
        };
        (track, TrackHandle { id, live })
    }
}

#[async_trait]
impl LocalTrack for MarkerTrack {
    fn id(&self) -> &str {
        &self.id
    }

    async fn recv(&mut self) -> Result<Frame, TrackError> {
        let (pts, time_base) = self.pacer.next_timestamp().await?;
        Ok(Frame::bgr(self.canvas.clone(), self.resolution, pts, time_base)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disc_is_painted_at_the_position() {
        let config = SessionConfig::default();
        let res = config.stream.resolution;
        let canvas = render_marker(res, MarkerPosition::new(32, 100), &config.marker);
        let frame = Frame::bgr(canvas, res, 0, config.stream.time_base()).unwrap();

        assert_eq!(frame.pixel(32, 100), Some([255, 0, 0]));
        assert_eq!(frame.pixel(32, 120), Some([255, 0, 0]));
        assert_eq!(frame.pixel(52, 100), Some([255, 0, 0]));
        assert_eq!(frame.pixel(32, 121), Some([0, 0, 0]));
        assert_eq!(frame.pixel(47, 115), Some([0, 0, 0]));
        assert_eq!(frame.pixel(400, 400), Some([0, 0, 0]));
    }

    #[test]
    fn disc_near_the_edge_is_clipped() {
        let config = SessionConfig::default();
        let res = config.stream.resolution;
        let canvas = render_marker(res, MarkerPosition::new(32, 2), &config.marker);
        assert_eq!(canvas.len(), 512 * 512 * 3);
        assert_eq!(&canvas[(32 * 3)..(32 * 3 + 3)], &[255, 0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_the_handle_ends_the_track() {
        let config = SessionConfig::default();
        let (mut track, handle) = MarkerTrack::new("marker-0".into(), &config, MarkerPosition::default());

        let first = track.recv().await.unwrap();
        assert_eq!(first.pts, 0);
        assert_eq!(first.resolution, Resolution::MARKER_CANVAS);
        let second = track.recv().await.unwrap();
        assert_eq!(second.pts, 3_000);

        handle.stop();
        assert_eq!(handle.id(), "marker-0");
        assert!(matches!(track.recv().await, Err(TrackError::NotLive)));
    }
}
