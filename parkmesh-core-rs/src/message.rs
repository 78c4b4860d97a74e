//! Status message wire format
//!
//! Every report travels from a node to the root as one fixed-size frame:
//!
//! | offset | field     | size | notes                               |
//! |--------|-----------|------|-------------------------------------|
//! | 0      | src_id    | 1    | logical id of the reporting node    |
//! | 1      | hop_count | 1    | reserved, always 0 at origin        |
//! | 2..62  | payload   | 60   | NUL-terminated ASCII status text    |
//!
//! Frames shorter than [`FRAME_LEN`] are rejected. Trailing bytes past the
//! frame are ignored.

use thiserror::Error;

use crate::types::{LogicalId, Occupancy, SensorReading, OCCUPIED_KEYWORD};

/// Size of the payload buffer, terminator included
pub const PAYLOAD_CAPACITY: usize = 60;

/// Longest status text that fits in a frame
pub const MAX_PAYLOAD_LEN: usize = PAYLOAD_CAPACITY - 1;

/// Encoded size of a [`StatusMessage`]
pub const FRAME_LEN: usize = 2 + PAYLOAD_CAPACITY;

const SRC_ID_OFFSET: usize = 0;
const HOP_COUNT_OFFSET: usize = 1;
const PAYLOAD_OFFSET: usize = 2;

/// Errors building or decoding a status frame
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame too short: {len} bytes, need 62")]
    Undersized { len: usize },

    #[error("payload too long: {len} bytes, max 59")]
    PayloadTooLong { len: usize },

    #[error("payload is not NUL-free ASCII")]
    NonAscii,

    #[error("payload has no terminator")]
    Unterminated,
}

/// Report sent by a node to the root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    src_id: LogicalId,
    hop_count: u8,
    payload: String,
}

impl StatusMessage {
    /// Build a message at its origin (hop count 0)
    pub fn new(src_id: LogicalId, payload: impl Into<String>) -> Result<Self, CodecError> {
        let payload = payload.into();
        validate_payload(payload.as_bytes())?;

        Ok(Self {
            src_id,
            hop_count: 0,
            payload,
        })
    }

    pub fn src_id(&self) -> LogicalId {
        self.src_id
    }

    pub fn hop_count(&self) -> u8 {
        self.hop_count
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Whether the status text reports the slot as occupied.
    ///
    /// This is a plain substring match on the keyword; the text itself is
    /// forwarded untouched for downstream parsing.
    pub fn reports_occupied(&self) -> bool {
        self.payload.contains(OCCUPIED_KEYWORD)
    }

    /// Serialize into the fixed frame layout
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut frame = [0u8; FRAME_LEN];
        frame[SRC_ID_OFFSET] = self.src_id;
        frame[HOP_COUNT_OFFSET] = self.hop_count;

        let text = self.payload.as_bytes();
        frame[PAYLOAD_OFFSET..PAYLOAD_OFFSET + text.len()].copy_from_slice(text);
        // The rest of the buffer is already zero, terminator included.
        frame
    }

    /// Parse a received frame
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < FRAME_LEN {
            return Err(CodecError::Undersized { len: bytes.len() });
        }

        let buffer = &bytes[PAYLOAD_OFFSET..FRAME_LEN];
        let end = buffer
            .iter()
            .position(|b| *b == 0)
            .ok_or(CodecError::Unterminated)?;
        let text = &buffer[..end];
        if !text.is_ascii() {
            return Err(CodecError::NonAscii);
        }

        Ok(Self {
            src_id: bytes[SRC_ID_OFFSET],
            hop_count: bytes[HOP_COUNT_OFFSET],
            // ASCII checked above, so this cannot fail
            payload: String::from_utf8_lossy(text).into_owned(),
        })
    }
}

fn validate_payload(text: &[u8]) -> Result<(), CodecError> {
    if text.len() > MAX_PAYLOAD_LEN {
        return Err(CodecError::PayloadTooLong { len: text.len() });
    }
    if !text.is_ascii() || text.contains(&0) {
        return Err(CodecError::NonAscii);
    }
    Ok(())
}

/// Human readable status text for one report cycle.
///
/// Always fits in [`MAX_PAYLOAD_LEN`] bytes; longer text is cut off.
pub fn status_text(
    src_id: LogicalId,
    reading: &SensorReading,
    occupancy: Occupancy,
    layer: u8,
) -> String {
    let mut text = match occupancy {
        Occupancy::Unknown => format!("Node {}: ERROR sensor (layer {})", src_id, layer),
        known => format!(
            "Node {}: {} (dist={:.1} cm, layer {})",
            src_id,
            known.keyword(),
            reading.distance_cm,
            layer
        ),
    };
    text.truncate(MAX_PAYLOAD_LEN);
    text
}

/// Broker topic for a node: `<prefix>/node/<src_id>`
pub fn topic_for(prefix: &str, src_id: LogicalId) -> String {
    format!("{}/node/{}", prefix.trim_end_matches('/'), src_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_frame_layout() {
        let msg = StatusMessage::new(7, "Node 7: FREE").unwrap();
        let frame = msg.encode();

        assert_eq!(frame.len(), 62);
        assert_eq!(frame[0], 7);
        assert_eq!(frame[1], 0);
        assert_eq!(&frame[2..14], b"Node 7: FREE");
        assert!(frame[14..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_decode_rejects_short_frames() {
        assert_eq!(
            StatusMessage::decode(&[0u8; 10]),
            Err(CodecError::Undersized { len: 10 })
        );
        assert_eq!(
            StatusMessage::decode(&[0u8; 61]),
            Err(CodecError::Undersized { len: 61 })
        );
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let msg = StatusMessage::new(3, "Node 3: OCCUPIED").unwrap();
        let mut bytes = msg.encode().to_vec();
        bytes.extend_from_slice(&[0xff; 20]);

        assert_eq!(StatusMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_decode_rejects_unterminated_payload() {
        let mut frame = [b'A'; FRAME_LEN];
        frame[0] = 1;
        frame[1] = 0;
        assert_eq!(StatusMessage::decode(&frame), Err(CodecError::Unterminated));
    }

    #[test]
    fn test_decode_rejects_non_ascii() {
        let mut frame = [0u8; FRAME_LEN];
        frame[2] = 0xc3;
        frame[3] = 0xa9;
        assert_eq!(StatusMessage::decode(&frame), Err(CodecError::NonAscii));
    }

    #[test]
    fn test_new_rejects_bad_payloads() {
        let long = "x".repeat(60);
        assert_eq!(
            StatusMessage::new(1, long),
            Err(CodecError::PayloadTooLong { len: 60 })
        );
        assert_eq!(StatusMessage::new(1, "a\0b"), Err(CodecError::NonAscii));
        assert_eq!(StatusMessage::new(1, "occupied \u{b0}"), Err(CodecError::NonAscii));
        assert!(StatusMessage::new(1, "x".repeat(59)).is_ok());
    }

    #[test]
    fn test_status_text_variants() {
        let occupied = status_text(7, &SensorReading::valid(15.0), Occupancy::Occupied, 2);
        assert_eq!(occupied, "Node 7: OCCUPIED (dist=15.0 cm, layer 2)");

        let free = status_text(7, &SensorReading::valid(87.34), Occupancy::Free, 3);
        assert_eq!(free, "Node 7: FREE (dist=87.3 cm, layer 3)");

        let error = status_text(7, &SensorReading::invalid(), Occupancy::Unknown, 2);
        assert_eq!(error, "Node 7: ERROR sensor (layer 2)");
        assert!(!error.contains(OCCUPIED_KEYWORD));
    }

    #[test]
    fn test_status_text_always_fits() {
        let text = status_text(255, &SensorReading::valid(1.0e30), Occupancy::Free, 255);
        assert!(text.len() <= MAX_PAYLOAD_LEN);
        assert!(StatusMessage::new(255, text).is_ok());
    }

    #[test]
    fn test_reports_occupied() {
        assert!(StatusMessage::new(1, "Node 1: OCCUPIED (dist=3.0 cm, layer 2)")
            .unwrap()
            .reports_occupied());
        assert!(!StatusMessage::new(1, "Node 1: FREE (dist=300.0 cm, layer 2)")
            .unwrap()
            .reports_occupied());
    }

    #[test]
    fn test_topic_for() {
        assert_eq!(topic_for("esp32/parking", 7), "esp32/parking/node/7");
        assert_eq!(topic_for("esp32/parking/", 12), "esp32/parking/node/12");
        assert_ne!(topic_for("p", 1), topic_for("p", 11));
    }

    proptest! {
        #[test]
        fn prop_encode_decode_preserves_message(src_id in any::<u8>(), payload in "[ -~]{0,59}") {
            let msg = StatusMessage::new(src_id, payload.clone()).unwrap();
            let decoded = StatusMessage::decode(&msg.encode()).unwrap();

            prop_assert_eq!(decoded.src_id(), src_id);
            prop_assert_eq!(decoded.hop_count(), 0);
            prop_assert_eq!(decoded.payload(), payload.as_str());
        }
    }
}
