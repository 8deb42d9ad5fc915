use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use image::{ExtendedColorType, ImageFormat};
use markerlink_core::{CodecError, Frame};
use markerlink_webrtc::codec::swap_red_blue;
use tracing::{debug, info, warn};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps a PNG snapshot of the latest received frame on disk.
///
/// Writing happens on its own thread; a frame offered while the previous one
/// is still being written is dropped.
pub struct PreviewWriter {
    tx: Mutex<Option<SyncSender<Frame>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PreviewWriter {
    pub fn spawn(path: PathBuf) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel::<Frame>(1);
        let handle = std::thread::Builder::new()
            .name("marker-preview".into())
            .spawn(move || {
                info!("Preview snapshots → {}", path.display());
                for frame in rx {
                    match write_png(&path, &frame) {
                        Ok(()) => debug!(pts = frame.pts, "Preview updated"),
                        Err(e) => warn!("Preview write failed: {e}"),
                    }
                }
            })?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Never blocks. Returns whether the frame was accepted.
    pub fn offer(&self, frame: Frame) -> bool {
        let guard = lock(&self.tx);
        let Some(tx) = guard.as_ref() else {
            return false;
        };
        match tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Preview busy, frame dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Flushes the pending snapshot and joins the writer thread.
    pub fn shutdown(&self) {
        lock(&self.tx).take();
        if let Some(handle) = lock(&self.handle).take() {
            if handle.join().is_err() {
                warn!("Preview thread panicked");
            }
        }
    }
}

/// Writes next to `path` and renames, so readers never see a partial file.
fn write_png(path: &Path, frame: &Frame) -> Result<(), CodecError> {
    let rgb = swap_red_blue(&frame.data);
    let tmp = path.with_extension("png.part");
    image::save_buffer_with_format(
        &tmp,
        &rgb,
        frame.width(),
        frame.height(),
        ExtendedColorType::Rgb8,
        ImageFormat::Png,
    )
    .map_err(|e| CodecError::Image(e.to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| CodecError::Image(e.to_string()))
}

#[cfg(test)]
mod tests {
    use markerlink_core::{Resolution, TimeBase};

    use super::*;

    #[test]
    fn snapshot_lands_on_disk_as_rgb() {
        let path = std::env::temp_dir().join(format!("markerlink-preview-{}.png", std::process::id()));
        let mut data = vec![0u8; 8 * 8 * 3];
        data[..3].copy_from_slice(&[255, 0, 0]);
        let frame = Frame::bgr(data, Resolution::new(8, 8), 0, TimeBase::VIDEO_90KHZ).unwrap();

        let preview = PreviewWriter::spawn(path.clone()).unwrap();
        assert!(preview.offer(frame));
        preview.shutdown();

        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (8, 8));
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 255]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn offers_after_shutdown_are_refused() {
        let path = std::env::temp_dir().join(format!("markerlink-preview-off-{}.png", std::process::id()));
        let preview = PreviewWriter::spawn(path).unwrap();
        preview.shutdown();
        let frame = Frame::bgr(vec![0u8; 3], Resolution::new(1, 1), 0, TimeBase::VIDEO_90KHZ).unwrap();
        assert!(!preview.offer(frame));
    }
}
