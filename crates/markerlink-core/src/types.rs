use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::errors::CodecError;

// MARK: - Resolution

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Canvas the synthetic marker is painted on.
    pub const MARKER_CANVAS: Self = Self { width: 512, height: 512 };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn total_pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}×{}", self.width, self.height)
    }
}

// MARK: - TimeBase

/// Rational ticks-per-second of a presentation timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    pub const VIDEO_90KHZ: Self = Self { num: 1, den: 90_000 };

    pub fn from_clock_rate(clock_rate: u32) -> Self {
        Self { num: 1, den: clock_rate }
    }

    /// Wall-clock offset of `pts` from the stream start.
    pub fn to_duration(&self, pts: u64) -> Duration {
        let nanos = pts as u128 * self.num as u128 * 1_000_000_000 / self.den.max(1) as u128;
        Duration::from_nanos(nanos as u64)
    }
}

// MARK: - Frame

pub const BGR_BYTES_PER_PIXEL: usize = 3;

/// Immutable BGR24 video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Bytes,
    pub resolution: Resolution,
    pub pts: u64,
    pub time_base: TimeBase,
}

impl Frame {
    /// Wraps a packed BGR24 buffer, checking its length against `resolution`.
    pub fn bgr(
        data: impl Into<Bytes>,
        resolution: Resolution,
        pts: u64,
        time_base: TimeBase,
    ) -> Result<Self, CodecError> {
        let data = data.into();
        let expected = resolution.total_pixels() as usize * BGR_BYTES_PER_PIXEL;
        if data.len() != expected {
            return Err(CodecError::BufferSize { expected, actual: data.len() });
        }
        Ok(Self { data, resolution, pts, time_base })
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    /// BGR triple at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let offset = (y as usize * self.width() as usize + x as usize) * BGR_BYTES_PER_PIXEL;
        let px = self.data.get(offset..offset + BGR_BYTES_PER_PIXEL)?;
        Some([px[0], px[1], px[2]])
    }
}

// MARK: - Coordinates

/// Marker center as reported by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: i32,
    pub y: i32,
}

impl Coordinates {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

// MARK: - MarkerPosition

/// Where the sender paints the marker in the next track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerPosition {
    pub x: i32,
    pub y: i32,
}

impl MarkerPosition {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Moves the marker down by `step`, wrapping modulo `extent`.
    pub fn advance(&mut self, step: i32, extent: i32) {
        self.y = (self.y + step).rem_euclid(extent.max(1));
    }
}

impl Default for MarkerPosition {
    fn default() -> Self {
        Self { x: 32, y: 32 }
    }
}

// MARK: - SessionDescription

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl std::fmt::Display for SdpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offer => write!(f, "offer"),
            Self::Answer => write!(f, "answer"),
        }
    }
}

/// Opaque SDP blob proposed by one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Answer, sdp: sdp.into() }
    }
}

// MARK: - SignalingMessage

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    Description(SessionDescription),
    /// The peer is leaving; the session ends.
    Bye,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_wraps_after_52_rounds() {
        let mut position = MarkerPosition::default();
        for _ in 0..52 {
            position.advance(10, 512);
        }
        assert_eq!(position, MarkerPosition::new(32, (32 + 520) % 512));
        assert_eq!(position.y, 40);
    }

    #[test]
    fn frame_rejects_short_buffer() {
        let err = Frame::bgr(vec![0u8; 10], Resolution::new(4, 4), 0, TimeBase::VIDEO_90KHZ)
            .expect_err("buffer too short");
        assert!(matches!(err, CodecError::BufferSize { expected: 48, actual: 10 }));
    }

    #[test]
    fn pixel_lookup_is_row_major_bgr() {
        let mut data = vec![0u8; 2 * 2 * 3];
        // (x=1, y=1) → last pixel
        data[9..12].copy_from_slice(&[255, 0, 7]);
        let frame = Frame::bgr(data, Resolution::new(2, 2), 0, TimeBase::VIDEO_90KHZ).unwrap();
        assert_eq!(frame.pixel(1, 1), Some([255, 0, 7]));
        assert_eq!(frame.pixel(0, 0), Some([0, 0, 0]));
        assert_eq!(frame.pixel(2, 0), None);
    }

    #[test]
    fn time_base_converts_ticks() {
        let tb = TimeBase::VIDEO_90KHZ;
        assert_eq!(tb.to_duration(90_000), Duration::from_secs(1));
        assert_eq!(tb.to_duration(3_000), Duration::from_nanos(33_333_333));
    }
}
