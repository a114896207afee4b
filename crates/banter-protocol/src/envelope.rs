//! Envelope types for the banter protocol.
//!
//! Envelopes are the unit of communication between clients and the relay.
//! They are serialized as JSON objects tagged by a `type` field. Inbound and
//! outbound envelopes are separate enums because the `chat-message` tag
//! carries different fields in each direction.

use serde::{Deserialize, Serialize};

/// An envelope received from a client.
///
/// Unknown `type` tags and schema violations fail deserialization; the relay
/// drops such envelopes without touching any state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEnvelope {
    /// Claim a display name for this connection.
    #[serde(rename = "join")]
    Join {
        /// Requested display name. Case-sensitive, must be non-empty.
        username: String,
    },

    /// A chat message, broadcast or directly addressed.
    #[serde(rename = "chat-message")]
    ChatMessage {
        /// Message body.
        text: String,
        /// Display name of a single recipient. Absent means broadcast.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient: Option<String>,
    },

    /// The sender started typing.
    #[serde(rename = "typing")]
    Typing { username: String },

    /// The sender stopped typing.
    #[serde(rename = "stop-typing")]
    StopTyping { username: String },
}

impl ClientEnvelope {
    /// Get the wire tag of this envelope, for logging and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEnvelope::Join { .. } => "join",
            ClientEnvelope::ChatMessage { .. } => "chat-message",
            ClientEnvelope::Typing { .. } => "typing",
            ClientEnvelope::StopTyping { .. } => "stop-typing",
        }
    }

    /// Create a new Join envelope.
    #[must_use]
    pub fn join(username: impl Into<String>) -> Self {
        ClientEnvelope::Join {
            username: username.into(),
        }
    }

    /// Create a broadcast chat message.
    #[must_use]
    pub fn chat(text: impl Into<String>) -> Self {
        ClientEnvelope::ChatMessage {
            text: text.into(),
            recipient: None,
        }
    }

    /// Create a directly-addressed chat message.
    #[must_use]
    pub fn chat_to(text: impl Into<String>, recipient: impl Into<String>) -> Self {
        ClientEnvelope::ChatMessage {
            text: text.into(),
            recipient: Some(recipient.into()),
        }
    }
}

/// An envelope sent by the relay to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEnvelope {
    /// Join succeeded; the connection now holds its display name.
    #[serde(rename = "joined")]
    Joined,

    /// Join rejected; the display name belongs to another open connection.
    #[serde(rename = "username_taken")]
    UsernameTaken,

    /// A broadcast chat message.
    #[serde(rename = "chat-message")]
    ChatMessage {
        /// Display name of the sender.
        author: String,
        /// Message body.
        text: String,
        /// Milliseconds since the Unix epoch, stamped at the relay.
        timestamp: u64,
    },

    /// A directly-addressed message. Also echoed to the sender as the
    /// delivery confirmation.
    #[serde(rename = "direct-message")]
    DirectMessage { from: String, text: String },

    /// Roster snapshot, broadcast on every membership change.
    #[serde(rename = "user-list")]
    UserList { users: Vec<String>, count: usize },

    /// Typing indicator, relayed verbatim.
    #[serde(rename = "typing")]
    Typing { username: String },

    /// Stop-typing indicator, relayed verbatim.
    #[serde(rename = "stop-typing")]
    StopTyping { username: String },

    /// Operator notice addressed to a single connection.
    #[serde(rename = "system")]
    System { message: String },
}

impl ServerEnvelope {
    /// Get the wire tag of this envelope, for logging and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEnvelope::Joined => "joined",
            ServerEnvelope::UsernameTaken => "username_taken",
            ServerEnvelope::ChatMessage { .. } => "chat-message",
            ServerEnvelope::DirectMessage { .. } => "direct-message",
            ServerEnvelope::UserList { .. } => "user-list",
            ServerEnvelope::Typing { .. } => "typing",
            ServerEnvelope::StopTyping { .. } => "stop-typing",
            ServerEnvelope::System { .. } => "system",
        }
    }

    /// Create a broadcast chat message.
    #[must_use]
    pub fn chat_message(
        author: impl Into<String>,
        text: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        ServerEnvelope::ChatMessage {
            author: author.into(),
            text: text.into(),
            timestamp,
        }
    }

    /// Create a direct message.
    #[must_use]
    pub fn direct_message(from: impl Into<String>, text: impl Into<String>) -> Self {
        ServerEnvelope::DirectMessage {
            from: from.into(),
            text: text.into(),
        }
    }

    /// Create a roster snapshot envelope.
    #[must_use]
    pub fn user_list(users: Vec<String>) -> Self {
        let count = users.len();
        ServerEnvelope::UserList { users, count }
    }

    /// Create a system notice.
    #[must_use]
    pub fn system(message: impl Into<String>) -> Self {
        ServerEnvelope::System {
            message: message.into(),
        }
    }
}
