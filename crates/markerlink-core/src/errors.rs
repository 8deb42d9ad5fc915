use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Negotiation failed: {reason}")]
    Negotiation { reason: String },

    #[error("Data channel '{label}' failed: {reason}")]
    DataChannel { label: String, reason: String },

    #[error("No local description has been applied")]
    NoLocalDescription,

    #[error("Session closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum TrackError {
    /// The track was stopped; its pacing loop must end.
    #[error("Track is not live")]
    NotLive,

    #[error("Remote track ended")]
    Ended,

    #[error("Frame codec error: {0}")]
    Codec(#[from] CodecError),
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame message truncated: {len} bytes")]
    Truncated { len: usize },

    #[error("Pixel buffer has {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    #[error("Image codec failed: {0}")]
    Image(String),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed side-channel payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Side-channel payload is not UTF-8")]
    NotUtf8,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration invalid: {reason}")]
    Invalid { reason: String },

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
