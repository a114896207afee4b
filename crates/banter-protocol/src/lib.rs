//! # banter-protocol
//!
//! Wire protocol definitions for the banter realtime relay server.
//!
//! This crate defines the JSON text envelopes exchanged between clients and
//! the relay, split by direction:
//!
//! - [`ClientEnvelope`] - what clients send: `join`, `chat-message`,
//!   `typing`, `stop-typing`
//! - [`ServerEnvelope`] - what the relay sends: `joined`, `username_taken`,
//!   `chat-message`, `direct-message`, `user-list`, `typing`, `stop-typing`,
//!   `system`
//!
//! Each WebSocket text message carries exactly one envelope; message
//! boundaries come from the transport framing.
//!
//! ## Example
//!
//! ```rust
//! use banter_protocol::{codec, ClientEnvelope, ServerEnvelope};
//!
//! let inbound = codec::decode(r#"{"type":"join","username":"alice"}"#).unwrap();
//! assert!(matches!(inbound, ClientEnvelope::Join { .. }));
//!
//! let outbound = ServerEnvelope::system("welcome");
//! let text = codec::encode(&outbound).unwrap();
//! assert!(text.contains("\"system\""));
//! ```

pub mod codec;
pub mod envelope;

pub use codec::{decode, encode, ProtocolError, MAX_ENVELOPE_SIZE};
pub use envelope::{ClientEnvelope, ServerEnvelope};
