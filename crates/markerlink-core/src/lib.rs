pub mod config;
pub mod coords;
pub mod errors;
pub mod session;
pub mod side_channel;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::SessionConfig;
pub use coords::{SharedCoordinateState, SharedCoordinates};
pub use errors::{CodecError, ConfigError, ProtocolError, SessionError, TrackError};
pub use session::{DataChannel, LocalTrack, PeerSession, RemoteTrack};
pub use types::*;
