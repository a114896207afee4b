//! Connection liveness supervision.
//!
//! The supervisor owns an explicit probe-state table keyed by connection ID,
//! sweeps it on a fixed interval, and evicts connections that fail to
//! acknowledge a probe in time. Eviction closes the connection handle, which
//! drives the session task through the exact same teardown as a peer
//! disconnect, so half-open transports that never signal closure cannot
//! linger in the roster.
//!
//! State machine per connection:
//!
//! ```text
//! ALIVE ──sweep──▶ PROBE_SENT ──pong──▶ ALIVE
//!                      │
//!                   timeout ──▶ EVICTED
//! ```

use crate::connection::{ConnectionId, ConnectionTable};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How often the sweep runs and probes are sent.
    pub probe_interval: Duration,
    /// How long a probe may remain unacknowledged before eviction.
    ///
    /// With the default equal to the interval, a connection still awaiting
    /// acknowledgment when the next sweep fires is evicted.
    pub probe_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-connection probe state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Liveness {
    Alive,
    ProbeSent { since: Instant },
}

/// The liveness supervisor.
pub struct Supervisor {
    connections: Arc<ConnectionTable>,
    states: DashMap<ConnectionId, Liveness>,
    config: SupervisorConfig,
}

impl Supervisor {
    /// Create a supervisor over the given connection table.
    #[must_use]
    pub fn new(connections: Arc<ConnectionTable>, config: SupervisorConfig) -> Self {
        Self {
            connections,
            states: DashMap::new(),
            config,
        }
    }

    /// Start tracking a connection. Called on transport accept.
    pub fn track(&self, id: &ConnectionId) {
        self.states.insert(id.clone(), Liveness::Alive);
    }

    /// Stop tracking a connection. Idempotent; called on session teardown.
    pub fn forget(&self, id: &ConnectionId) {
        self.states.remove(id);
    }

    /// Record a probe acknowledgment, resetting the connection to alive.
    pub fn mark_pong(&self, id: &ConnectionId) {
        if let Some(mut state) = self.states.get_mut(id) {
            *state = Liveness::Alive;
        }
    }

    /// Number of tracked connections.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    /// Run one sweep over all tracked connections.
    ///
    /// Alive connections get a probe and move to probe-sent; connections
    /// whose probe has gone unacknowledged past the timeout are evicted, as
    /// are connections whose probe cannot even be enqueued. Returns the
    /// number of evictions.
    pub fn sweep(&self) -> usize {
        let ids: Vec<ConnectionId> = self.states.iter().map(|e| e.key().clone()).collect();
        let mut evicted = 0;

        for id in ids {
            let Some(handle) = self.connections.get(&id) else {
                self.states.remove(&id);
                continue;
            };
            if handle.is_closed() {
                self.states.remove(&id);
                continue;
            }

            let Some(state) = self.states.get(&id).map(|e| *e.value()) else {
                continue;
            };
            match state {
                Liveness::ProbeSent { since } => {
                    if since.elapsed() >= self.config.probe_timeout {
                        warn!(connection = %id, "Evicting unresponsive connection");
                        handle.close();
                        self.states.remove(&id);
                        evicted += 1;
                    }
                }
                Liveness::Alive => {
                    if handle.send_probe() {
                        self.states
                            .insert(id, Liveness::ProbeSent { since: Instant::now() });
                    } else {
                        // Probe could not be enqueued: immediate eviction, no retry.
                        warn!(connection = %id, "Probe send failed, evicting connection");
                        handle.close();
                        self.states.remove(&id);
                        evicted += 1;
                    }
                }
            }
        }

        evicted
    }

    /// Drive sweeps on the configured interval until shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if *shutdown.borrow() {
            return;
        }
        let mut ticker = interval(self.config.probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so fresh connections
        // get a full interval before their first probe.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.sweep();
                    if evicted > 0 {
                        debug!(evicted, "Liveness sweep evicted connections");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Liveness supervisor stopped");
                        return;
                    }
                }
            }
        }
    }
}
