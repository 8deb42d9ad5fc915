//! Frames over `video-*` data channels.
//!
//! Sending side: [`pump`] drains a [`LocalTrack`] into its channel until the
//! track stops. Receiving side: [`RtcRemoteTrack`] buffers raw messages from
//! the channel callback and decodes them on demand.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use markerlink_core::session::{DataChannel, LocalTrack, RemoteTrack};
use markerlink_core::TrackError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

use crate::channel::RtcDataChannel;
use crate::codec::{decode_frame, encode_frame};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Sending ──────────────────────────────────────────────────────────────────

/// Pulls frames from `track` and sends each one on `channel`.
///
/// Gives up if the channel is not open within `open_timeout`. Ends when the
/// track reports [`TrackError::NotLive`] or the channel fails, then closes
/// the channel.
pub async fn pump(mut track: Box<dyn LocalTrack>, channel: Arc<RtcDataChannel>, open_timeout: Duration) {
    let label = channel.label().to_owned();
    match tokio::time::timeout(open_timeout, channel.wait_open()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(channel = %label, "Track channel never opened: {e}");
            return;
        }
        Err(_) => {
            warn!(channel = %label, ?open_timeout, "Track channel did not open in time");
            if let Err(e) = channel.close().await {
                debug!(channel = %label, "Close failed: {e}");
            }
            return;
        }
    }
    info!(channel = %label, track = track.id(), "Streaming track");

    let mut sent = 0u64;
    loop {
        let frame = match track.recv().await {
            Ok(frame) => frame,
            Err(TrackError::NotLive) => break,
            Err(e) => {
                warn!(channel = %label, "Track failed: {e}");
                break;
            }
        };

        let payload = match tokio::task::spawn_blocking(move || encode_frame(&frame)).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(e)) => {
                warn!(channel = %label, "Frame encode failed: {e}");
                continue;
            }
            Err(e) => {
                warn!(channel = %label, "Encoder task failed: {e}");
                break;
            }
        };

        if let Err(e) = channel.send_bytes(&payload).await {
            debug!(channel = %label, "Send failed, stopping pump: {e}");
            break;
        }
        sent += 1;
    }

    debug!(channel = %label, sent, "Track pump finished");
    if let Err(e) = channel.close().await {
        debug!(channel = %label, "Close failed: {e}");
    }
}

// ── Receiving ────────────────────────────────────────────────────────────────

/// Inbound track fed by a `video-*` data channel.
///
/// Messages arriving while `capacity` payloads are already buffered are
/// dropped; the webrtc callback never waits on the consumer.
pub struct RtcRemoteTrack {
    id: String,
    rx: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
}

impl RtcRemoteTrack {
    pub fn attach(channel: &Arc<RTCDataChannel>, capacity: usize) -> Arc<Self> {
        let id = channel.label().to_owned();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let tx = Arc::new(Mutex::new(Some(tx)));

        let msg_tx = Arc::clone(&tx);
        let msg_id = id.clone();
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            if let Some(tx) = lock(&msg_tx).as_ref() {
                if tx.try_send(msg.data).is_err() {
                    debug!(track = %msg_id, "Frame buffer full, dropping frame");
                }
            }
            Box::pin(async {})
        }));

        // Dropping the sender ends the stream once buffered frames are read.
        channel.on_close(Box::new(move || {
            lock(&tx).take();
            Box::pin(async {})
        }));

        Arc::new(Self { id, rx: tokio::sync::Mutex::new(rx) })
    }
}

#[async_trait]
impl RemoteTrack for RtcRemoteTrack {
    fn id(&self) -> &str {
        &self.id
    }

    async fn recv(&self) -> Result<markerlink_core::Frame, TrackError> {
        let payload = self.rx.lock().await.recv().await.ok_or(TrackError::Ended)?;
        let frame = tokio::task::spawn_blocking(move || decode_frame(&payload))
            .await
            .map_err(|_| TrackError::Ended)??;
        Ok(frame)
    }
}
