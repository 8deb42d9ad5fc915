//! Marker analysis on a dedicated OS thread.
//!
//! ```text
//! track handler ──WorkItem──► [bounded queue] ──► analysis thread
//!                                                   │ locate()
//!                                                   ▼
//!                                       SharedCoordinateState (x, y)
//! ```
//!
//! The queue is the only way in. A full queue suspends the enqueuing task.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use markerlink_core::{Frame, SharedCoordinates};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::locator::MarkerLocator;

pub enum WorkItem {
    Frame { frame: Frame, arrival: Instant },
    /// Ends the worker; items queued behind it are never processed.
    Stop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalysisStats {
    pub frames: u64,
    pub located: u64,
    /// Longest time a frame sat in the queue.
    pub max_queue_delay: Duration,
}

pub struct AnalysisWorker {
    handle: JoinHandle<AnalysisStats>,
}

impl AnalysisWorker {
    pub fn spawn<L>(
        queue: mpsc::Receiver<WorkItem>,
        locator: L,
        coords: SharedCoordinates,
    ) -> std::io::Result<Self>
    where
        L: MarkerLocator + 'static,
    {
        let handle = std::thread::Builder::new()
            .name("marker-analysis".into())
            .spawn(move || analysis_loop(queue, locator, coords))?;
        Ok(Self { handle })
    }

    /// Waits for the thread. Call after `Stop` has been queued or every
    /// sender is gone.
    pub fn join(self) -> AnalysisStats {
        match self.handle.join() {
            Ok(stats) => stats,
            Err(_) => {
                error!("Analysis thread panicked");
                AnalysisStats::default()
            }
        }
    }
}

fn analysis_loop<L: MarkerLocator>(
    mut queue: mpsc::Receiver<WorkItem>,
    mut locator: L,
    coords: SharedCoordinates,
) -> AnalysisStats {
    info!("Analysis thread started");
    let mut stats = AnalysisStats::default();

    while let Some(item) = queue.blocking_recv() {
        let (frame, arrival) = match item {
            WorkItem::Frame { frame, arrival } => (frame, arrival),
            WorkItem::Stop => {
                debug!("Stop received");
                break;
            }
        };

        stats.frames += 1;
        stats.max_queue_delay = stats.max_queue_delay.max(arrival.elapsed());

        match locator.locate(&frame) {
            Some(found) => {
                coords.store(found);
                stats.located += 1;
                debug!(pts = frame.pts, x = found.x, y = found.y, "Marker located");
            }
            None => debug!(pts = frame.pts, "No marker in frame"),
        }
    }

    info!(frames = stats.frames, located = stats.located, "Analysis thread finished");
    stats
}
