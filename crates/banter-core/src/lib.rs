//! # banter-core
//!
//! The relay engine behind the banter server.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Connection** - Per-peer outbound handle and the live connection table
//! - **Registry** - Display name to connection mapping with uniqueness
//! - **Router** - Classifies inbound envelopes and fans out deliveries
//! - **Supervisor** - Probes connections and evicts unresponsive ones
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│   Router    │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲
//!        │ probe / evict
//! ┌─────────────┐
//! │ Supervisor  │
//! └─────────────┘
//! ```
//!
//! The server owns every connection for its lifetime; the router and
//! supervisor operate on connections only through [`ConnectionHandle`]
//! references and never block on a single peer's send queue.

pub mod connection;
pub mod registry;
pub mod router;
pub mod supervisor;

pub use connection::{ConnectionHandle, ConnectionId, ConnectionTable, Outbound};
pub use registry::{Registry, RegistryError, Roster};
pub use router::{Router, RouterPolicy};
pub use supervisor::{Supervisor, SupervisorConfig};
