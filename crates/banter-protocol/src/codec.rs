//! Codec for encoding and decoding banter envelopes.
//!
//! The wire format is one JSON object per WebSocket text message. The codec
//! enforces a size ceiling before parsing so oversized payloads are rejected
//! cheaply.

use thiserror::Error;

use crate::envelope::{ClientEnvelope, ServerEnvelope};

/// Maximum envelope size in bytes (64 KiB).
pub const MAX_ENVELOPE_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Envelope exceeds the maximum size.
    #[error("Envelope size {0} exceeds maximum {MAX_ENVELOPE_SIZE}")]
    TooLarge(usize),

    /// JSON decoding error (malformed or schema-violating envelope).
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Decode a client envelope from a WebSocket text payload.
///
/// # Errors
///
/// Returns an error if the payload is oversized, not valid JSON, carries an
/// unknown `type` tag, or is missing a required field. Callers drop the
/// envelope on error; decoding failures never terminate the connection.
pub fn decode(text: &str) -> Result<ClientEnvelope, ProtocolError> {
    if text.len() > MAX_ENVELOPE_SIZE {
        return Err(ProtocolError::TooLarge(text.len()));
    }
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}

/// Encode a server envelope to a WebSocket text payload.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(envelope: &ServerEnvelope) -> Result<String, ProtocolError> {
    serde_json::to_string(envelope).map_err(ProtocolError::Encode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_join() {
        let env = decode(r#"{"type":"join","username":"alice"}"#).unwrap();
        assert_eq!(env, ClientEnvelope::join("alice"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode("not json"), Err(ProtocolError::Decode(_))));
        assert!(matches!(decode("{}"), Err(ProtocolError::Decode(_))));
        assert!(matches!(
            decode(r#"{"type":"warp"}"#),
            Err(ProtocolError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_oversized() {
        let text = format!(
            r#"{{"type":"chat-message","text":"{}"}}"#,
            "x".repeat(MAX_ENVELOPE_SIZE)
        );
        assert!(matches!(decode(&text), Err(ProtocolError::TooLarge(_))));
    }

    #[test]
    fn test_encode_decode_tags_align() {
        // Outbound typing indicators must round-trip through the same tag
        // spelling clients use.
        let text = encode(&ServerEnvelope::Typing {
            username: "alice".into(),
        })
        .unwrap();
        let back = decode(&text).unwrap();
        assert_eq!(
            back,
            ClientEnvelope::Typing {
                username: "alice".into()
            }
        );
    }
}
