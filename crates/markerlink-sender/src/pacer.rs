use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use markerlink_core::config::StreamConfig;
use markerlink_core::{TimeBase, TrackError};
use tokio::time::Instant;

/// Stamps frames on a fixed clock and holds each one back until its
/// presentation time.
///
/// Late frames are not compensated: a slow consumer simply sees every later
/// deadline already passed.
pub struct FramePacer {
    tick: u64,
    time_base: TimeBase,
    start: Option<Instant>,
    pts: u64,
    live: Arc<AtomicBool>,
}

impl FramePacer {
    pub fn new(stream: &StreamConfig, live: Arc<AtomicBool>) -> Self {
        Self {
            tick: stream.tick(),
            time_base: stream.time_base(),
            start: None,
            pts: 0,
            live,
        }
    }

    pub async fn next_timestamp(&mut self) -> Result<(u64, TimeBase), TrackError> {
        if !self.live.load(Ordering::Acquire) {
            return Err(TrackError::NotLive);
        }

        match self.start {
            None => {
                self.start = Some(Instant::now());
                self.pts = 0;
            }
            Some(start) => {
                self.pts += self.tick;
                let deadline = start + self.time_base.to_duration(self.pts);
                tokio::time::sleep_until(deadline).await;
            }
        }
        Ok((self.pts, self.time_base))
    }
}
