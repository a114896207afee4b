//! Inbound envelope routing.
//!
//! The router classifies each decoded envelope and fans deliveries out
//! through connection handles. Dispatch is fully synchronous: every delivery
//! is a non-blocking enqueue, so one slow or dead peer can never stall
//! delivery to the others.

use crate::connection::{ConnectionHandle, ConnectionId, ConnectionTable};
use crate::registry::{Registry, RegistryError, Roster};
use banter_protocol::{ClientEnvelope, ServerEnvelope};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Routing policy knobs.
#[derive(Debug, Clone)]
pub struct RouterPolicy {
    /// Whether a broadcast `chat-message` is echoed back to its author.
    ///
    /// Off by default: the author already has the message locally.
    pub echo_chat_to_sender: bool,
}

impl Default for RouterPolicy {
    fn default() -> Self {
        Self {
            echo_chat_to_sender: false,
        }
    }
}

/// The relay's message router.
pub struct Router {
    connections: Arc<ConnectionTable>,
    registry: Arc<Registry>,
    policy: RouterPolicy,
}

impl Router {
    /// Create a router with the default policy.
    #[must_use]
    pub fn new(connections: Arc<ConnectionTable>, registry: Arc<Registry>) -> Self {
        Self::with_policy(connections, registry, RouterPolicy::default())
    }

    /// Create a router with a custom policy.
    #[must_use]
    pub fn with_policy(
        connections: Arc<ConnectionTable>,
        registry: Arc<Registry>,
        policy: RouterPolicy,
    ) -> Self {
        Self {
            connections,
            registry,
            policy,
        }
    }

    /// Classify and dispatch one inbound envelope.
    ///
    /// `identity` is the session-local display name; it is set exactly once,
    /// on a successful join. Envelopes that violate their preconditions are
    /// dropped without mutating any state.
    pub fn dispatch(
        &self,
        conn: &Arc<ConnectionHandle>,
        identity: &mut Option<String>,
        envelope: ClientEnvelope,
    ) {
        match envelope {
            ClientEnvelope::Join { username } => self.handle_join(conn, identity, username),
            ClientEnvelope::ChatMessage { text, recipient } => {
                let Some(author) = identity.as_deref() else {
                    debug!(connection = %conn.id(), "Dropping chat-message from unidentified connection");
                    return;
                };
                match recipient {
                    Some(recipient) => self.handle_direct(conn, author, &recipient, text),
                    None => self.handle_broadcast_chat(conn, author, text),
                }
            }
            ClientEnvelope::Typing { username } => {
                self.handle_typing(conn, identity, ServerEnvelope::Typing { username });
            }
            ClientEnvelope::StopTyping { username } => {
                self.handle_typing(conn, identity, ServerEnvelope::StopTyping { username });
            }
        }
    }

    fn handle_join(
        &self,
        conn: &Arc<ConnectionHandle>,
        identity: &mut Option<String>,
        username: String,
    ) {
        if let Some(current) = identity.as_deref() {
            warn!(
                connection = %conn.id(),
                current = %current,
                requested = %username,
                "Dropping join from identified connection"
            );
            return;
        }

        match self.registry.try_register(&username, conn) {
            Ok(roster) => {
                *identity = Some(username.clone());
                info!(connection = %conn.id(), user = %username, "User joined");
                conn.send(ServerEnvelope::Joined);
                self.broadcast_roster(&roster);
            }
            Err(RegistryError::NameTaken(name)) => {
                debug!(connection = %conn.id(), user = %name, "Username taken");
                conn.send(ServerEnvelope::UsernameTaken);
            }
            Err(RegistryError::AlreadyIdentified(name)) => {
                // Session state and registry disagree; keep the registry's view.
                warn!(connection = %conn.id(), user = %name, "Registry already holds a name for this connection");
                *identity = Some(name);
            }
            Err(RegistryError::InvalidName(reason)) => {
                debug!(connection = %conn.id(), reason, "Rejected invalid username");
                conn.send(ServerEnvelope::system(reason));
            }
        }
    }

    fn handle_broadcast_chat(&self, conn: &Arc<ConnectionHandle>, author: &str, text: String) {
        let envelope = ServerEnvelope::chat_message(author, text, now_millis());
        if self.policy.echo_chat_to_sender {
            self.broadcast(&envelope);
        } else {
            self.broadcast_except(&envelope, conn.id());
        }
    }

    fn handle_direct(
        &self,
        conn: &Arc<ConnectionHandle>,
        author: &str,
        recipient: &str,
        text: String,
    ) {
        match self.registry.lookup(recipient) {
            Some(target) => {
                let envelope = ServerEnvelope::direct_message(author, text);
                target.send(envelope.clone());
                // Delivery confirmation: the author sees the same envelope.
                conn.send(envelope);
            }
            None => {
                debug!(from = %author, to = %recipient, "Direct message to unknown recipient");
                conn.send(ServerEnvelope::system(format!(
                    "User '{recipient}' is not connected"
                )));
            }
        }
    }

    fn handle_typing(
        &self,
        conn: &Arc<ConnectionHandle>,
        identity: &Option<String>,
        envelope: ServerEnvelope,
    ) {
        if identity.is_none() {
            debug!(connection = %conn.id(), "Dropping typing indicator from unidentified connection");
            return;
        }
        self.broadcast_except(&envelope, conn.id());
    }

    /// Broadcast a roster snapshot to every connection.
    ///
    /// Also used by the server's disconnect path, so departures and joins
    /// announce membership the same way.
    pub fn broadcast_roster(&self, roster: &Roster) {
        self.broadcast(&ServerEnvelope::user_list(roster.users.clone()));
    }

    fn broadcast(&self, envelope: &ServerEnvelope) {
        for peer in self.connections.snapshot() {
            peer.send(envelope.clone());
        }
    }

    fn broadcast_except(&self, envelope: &ServerEnvelope, except: &ConnectionId) {
        for peer in self.connections.snapshot() {
            if peer.id() != except {
                peer.send(envelope.clone());
            }
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}
