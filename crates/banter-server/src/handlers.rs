//! Connection handlers for the banter relay.
//!
//! This module owns the connection lifecycle: accept, session loop,
//! teardown, and graceful shutdown. Each WebSocket session runs one task
//! that both drains the connection's outbound queue and processes inbound
//! frames, so events for a single connection stay ordered while connections
//! stay independent of each other.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use banter_core::{
    ConnectionHandle, ConnectionTable, Outbound, Registry, Router as RelayRouter, Supervisor,
};
use banter_protocol::codec;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// All live connections, identified or not.
    pub connections: Arc<ConnectionTable>,
    /// Display name registry.
    pub registry: Arc<Registry>,
    /// The envelope router.
    pub router: RelayRouter,
    /// Liveness supervisor.
    pub supervisor: Arc<Supervisor>,
    /// Server configuration.
    pub config: Config,
    shutdown_tx: watch::Sender<bool>,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let connections = Arc::new(ConnectionTable::new());
        let registry = Arc::new(Registry::new());
        let router = RelayRouter::new(connections.clone(), registry.clone());
        let supervisor = Arc::new(Supervisor::new(
            connections.clone(),
            config.supervisor_config(),
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            connections,
            registry,
            router,
            supervisor,
            config,
            shutdown_tx,
        }
    }

    /// Begin graceful shutdown: stop accepting, stop the supervisor, then
    /// close every open connection so session tasks drain.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.connections.close_all();
    }

    /// A receiver that resolves when shutdown begins.
    #[must_use]
    pub fn shutdown_watch(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}

/// Run the relay with the given configuration until interrupted.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("banter relay listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    {
        let state = state.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                state.shutdown();
            }
        });
    }

    serve(listener, state).await
}

/// Serve on an already-bound listener until [`AppState::shutdown`] is called.
///
/// Split out from [`run_server`] so tests can bind an ephemeral port.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    tokio::spawn(state.supervisor.clone().run(state.shutdown_watch()));

    let app = Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state.clone());

    let graceful = {
        let mut shutdown = state.shutdown_watch();
        async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(graceful)
        .await?;

    info!("Listener released, relay stopped");
    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Run one connection's session: accept, pump, tear down.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (handle, mut outbound) = ConnectionHandle::new(state.config.limits.outbound_queue);
    let conn_id = handle.id().clone();

    state.connections.insert(handle.clone());
    state.supervisor.track(&conn_id);

    debug!(connection = %conn_id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    // Session-local identity; set exactly once, on a successful join.
    let mut identity: Option<String> = None;
    let mut shutdown = state.shutdown_watch();

    loop {
        tokio::select! {
            // Outbound queue: envelopes, probes, pong replies
            maybe_out = outbound.recv() => {
                let Some(item) = maybe_out else { break };
                let message = match item {
                    Outbound::Envelope(envelope) => match codec::encode(&envelope) {
                        Ok(text) => {
                            metrics::record_message(text.len(), "outbound");
                            Message::Text(text)
                        }
                        Err(e) => {
                            error!(connection = %conn_id, error = %e, "Failed to encode envelope");
                            continue;
                        }
                    },
                    Outbound::Ping => Message::Ping(Vec::new()),
                    Outbound::Pong(payload) => Message::Pong(payload),
                };
                if sender.send(message).await.is_err() {
                    break;
                }
            }

            // Closed by the supervisor, by queue overflow, or by shutdown
            _ = handle.closed() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }

            // Inbound frames
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > state.config.limits.max_message_size {
                            debug!(connection = %conn_id, size = text.len(), "Dropping oversized message");
                            metrics::record_error("oversized");
                            continue;
                        }
                        metrics::record_message(text.len(), "inbound");

                        let start = Instant::now();
                        match codec::decode(&text) {
                            Ok(envelope) => {
                                state.router.dispatch(&handle, &mut identity, envelope);
                                metrics::set_identified(state.registry.len());
                            }
                            Err(e) => {
                                // Malformed input: dropped, connection survives.
                                debug!(connection = %conn_id, error = %e, "Dropping malformed envelope");
                                metrics::record_error("malformed");
                            }
                        }
                        metrics::record_dispatch(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(connection = %conn_id, "Dropping unexpected binary frame");
                        metrics::record_error("malformed");
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        handle.send_pong(payload);
                    }
                    Some(Ok(Message::Pong(_))) => {
                        state.supervisor.mark_pong(&conn_id);
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %conn_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %conn_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %conn_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Teardown: identical for peer disconnect, transport error, eviction,
    // and shutdown.
    state.supervisor.forget(&conn_id);
    state.connections.remove(&conn_id);
    handle.close();

    // Announce the departure only if the connection ever identified.
    if let Some((name, roster)) = state.registry.unregister(&conn_id) {
        info!(connection = %conn_id, user = %name, "User disconnected");
        state.router.broadcast_roster(&roster);
        metrics::set_identified(roster.count);
    }

    debug!(connection = %conn_id, "WebSocket disconnected");
}
