use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ConfigError;
use crate::types::{MarkerPosition, Resolution, TimeBase};

/// Full configuration shared by the sender and receiver binaries.
///
/// Every section falls back to its defaults, so a config file only needs the
/// fields it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub signaling: SignalingConfig,
    pub stream: StreamConfig,
    pub marker: MarkerConfig,
    pub negotiation: NegotiationConfig,
    pub analysis: AnalysisConfig,
    pub ice: IceConfig,
}

impl SessionConfig {
    /// Reads a JSON config file and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded session config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| Err(ConfigError::Invalid { reason: reason.to_owned() });

        if self.stream.target_fps == 0 {
            return invalid("stream.target_fps must be positive");
        }
        if self.stream.clock_rate == 0 {
            return invalid("stream.clock_rate must be positive");
        }
        if self.stream.clock_rate % self.stream.target_fps != 0 {
            return invalid("stream.clock_rate must be a multiple of stream.target_fps");
        }
        if self.stream.resolution.total_pixels() == 0 {
            return invalid("stream.resolution must not be empty");
        }
        if self.stream.frame_buffer == 0 {
            return invalid("stream.frame_buffer must be positive");
        }
        if self.analysis.queue_capacity == 0 {
            return invalid("analysis.queue_capacity must be positive");
        }
        if self.negotiation.heartbeat_interval_ms == Some(0) {
            return invalid("negotiation.heartbeat_interval_ms must be positive when set");
        }
        Ok(())
    }
}

// MARK: - Signaling

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub host: String,
    pub port: u16,
    /// Receiver-side connect attempts before giving up.
    pub connect_retries: u32,
    pub retry_interval_ms: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 1234,
            connect_retries: 20,
            retry_interval_ms: 500,
        }
    }
}

impl SignalingConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

// MARK: - Stream

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub resolution: Resolution,
    pub target_fps: u32,
    /// RTP-style video clock, ticks per second.
    pub clock_rate: u32,
    /// Undecoded frames each inbound track holds before newer ones are dropped.
    pub frame_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::MARKER_CANVAS,
            target_fps: 30,
            clock_rate: 90_000,
            frame_buffer: 8,
        }
    }
}

impl StreamConfig {
    /// Timestamp increment between consecutive frames.
    pub fn tick(&self) -> u64 {
        (self.clock_rate / self.target_fps.max(1)) as u64
    }

    pub fn time_base(&self) -> TimeBase {
        TimeBase::from_clock_rate(self.clock_rate)
    }

    /// Nominal wall-clock spacing of frames.
    pub fn frame_interval(&self) -> Duration {
        self.time_base().to_duration(self.tick())
    }
}

// MARK: - Marker

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    pub radius: u32,
    /// Fill color, blue-green-red.
    pub color_bgr: [u8; 3],
    pub start: MarkerPosition,
    /// Downward movement per negotiation round.
    pub step: i32,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            radius: 20,
            color_bgr: [255, 0, 0],
            start: MarkerPosition::default(),
            step: 10,
        }
    }
}

// MARK: - Negotiation

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Pause before each sender renegotiation; bounds the update rate.
    pub renegotiation_delay_ms: u64,
    /// How long the receiver waits for the side channel to open.
    pub channel_open_timeout_ms: u64,
    /// Receiver heartbeat period on the side channel; `None` disables it.
    pub heartbeat_interval_ms: Option<u64>,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            renegotiation_delay_ms: 500,
            channel_open_timeout_ms: 5_000,
            heartbeat_interval_ms: None,
        }
    }
}

impl NegotiationConfig {
    pub fn renegotiation_delay(&self) -> Duration {
        Duration::from_millis(self.renegotiation_delay_ms)
    }

    pub fn channel_open_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_open_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval_ms.map(Duration::from_millis)
    }
}

// MARK: - Analysis

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Work queue bound; a full queue suspends frame intake.
    pub queue_capacity: usize,
    /// Per-channel distance from the marker color still counted as marker.
    pub color_tolerance: u8,
    /// Fewer matching pixels than this means "no marker in frame".
    pub min_pixels: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            color_tolerance: 40,
            min_pixels: 16,
        }
    }
}

// MARK: - ICE

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    pub urls: Vec<String>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            urls: vec!["stun:stun.l.google.com:19302".to_owned()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = SessionConfig::default();
        cfg.validate().expect("defaults validate");
        assert_eq!(cfg.stream.tick(), 3_000);
        assert_eq!(cfg.stream.frame_interval(), Duration::from_nanos(33_333_333));
        assert_eq!(cfg.signaling.port, 1234);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{
            "marker": {"step": 5},
            "negotiation": {"heartbeat_interval_ms": 1000}
        }"#;

        let cfg: SessionConfig = serde_json::from_str(json).expect("valid partial config");
        assert_eq!(cfg.marker.step, 5);
        assert_eq!(cfg.marker.radius, 20);
        assert_eq!(cfg.negotiation.heartbeat_interval(), Some(Duration::from_secs(1)));
        assert_eq!(cfg.negotiation.renegotiation_delay_ms, 500);
        assert_eq!(cfg.stream.resolution, Resolution::MARKER_CANVAS);
    }

    #[test]
    fn rejects_uneven_clock_rate() {
        let mut cfg = SessionConfig::default();
        cfg.stream.target_fps = 7;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn rejects_zero_queue() {
        let mut cfg = SessionConfig::default();
        cfg.analysis.queue_capacity = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = SessionConfig::default();
        cfg.stream.frame_buffer = 0;
        assert!(cfg.validate().is_err());
    }
}
