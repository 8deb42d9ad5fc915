//! Application protocol spoken over the session's side channel.
//!
//! ```text
//! receiver ──► sender   {"x": 7, "y": 42}     coordinates, once per session
//! either   ──► either   ping <n>              heartbeat, never decoded
//! ```

use std::io;

use serde::Serialize;
use serde_json::ser::Formatter;

use crate::errors::ProtocolError;
use crate::types::Coordinates;

pub const HEARTBEAT_PREFIX: &str = "ping";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideChannelMessage {
    Heartbeat(String),
    Coordinates(Coordinates),
}

pub fn is_heartbeat(text: &str) -> bool {
    text.starts_with(HEARTBEAT_PREFIX)
}

pub fn heartbeat(seq: u64) -> String {
    format!("{HEARTBEAT_PREFIX} {seq}")
}

/// Classifies an inbound text message. Heartbeats short-circuit before any
/// JSON decoding.
pub fn decode(text: &str) -> Result<SideChannelMessage, ProtocolError> {
    if is_heartbeat(text) {
        return Ok(SideChannelMessage::Heartbeat(text.to_owned()));
    }
    let coords: Coordinates = serde_json::from_str(text)?;
    Ok(SideChannelMessage::Coordinates(coords))
}

/// Serializes coordinates as `{"x": <int>, "y": <int>}`.
pub fn encode_coordinates(coords: Coordinates) -> Result<String, ProtocolError> {
    let mut buf = Vec::with_capacity(24);
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    coords.serialize(&mut ser)?;
    String::from_utf8(buf).map_err(|_| ProtocolError::NotUtf8)
}

/// Compact JSON with a space after `:` and `,`.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_with_spacing() {
        let text = encode_coordinates(Coordinates::new(7, 42)).unwrap();
        assert_eq!(text, r#"{"x": 7, "y": 42}"#);
    }

    #[test]
    fn encodes_negative_values() {
        let text = encode_coordinates(Coordinates::new(-1, 0)).unwrap();
        assert_eq!(text, r#"{"x": -1, "y": 0}"#);
    }

    #[test]
    fn ping_is_heartbeat() {
        assert_eq!(
            decode("ping 3").unwrap(),
            SideChannelMessage::Heartbeat("ping 3".into())
        );
    }

    #[test]
    fn heartbeat_skips_json_decoding() {
        // Would fail to parse if it reached serde_json.
        assert!(matches!(decode("ping {{{"), Ok(SideChannelMessage::Heartbeat(_))));
        assert_eq!(heartbeat(12), "ping 12");
    }

    #[test]
    fn decodes_compact_and_spaced_coordinates() {
        assert_eq!(
            decode(r#"{"x": 7, "y": 42}"#).unwrap(),
            SideChannelMessage::Coordinates(Coordinates::new(7, 42))
        );
        assert_eq!(
            decode(r#"{"x":1,"y":2}"#).unwrap(),
            SideChannelMessage::Coordinates(Coordinates::new(1, 2))
        );
    }

    #[test]
    fn rejects_non_coordinate_text() {
        assert!(matches!(decode("hello"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(decode(r#"{"x": 1}"#), Err(ProtocolError::Malformed(_))));
    }
}
