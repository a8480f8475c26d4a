//! Relay HTTP + WebSocket server (single port).
//!
//! `GET /ws` upgrades to WebSocket; the `type` query parameter selects the
//! role. A primary gets a session created and its code back; a secondary
//! joins an existing session by code and its traffic is relayed to the
//! primary. Every other path falls through to the static asset responder,
//! which never touches session state.

use crate::config::Config;
use crate::relay::connection::{Connection, ConnectionEvent};
use crate::relay::protocol::{self, ConnectQuery, Role, ServerMessage};
use crate::relay::registry::SessionRegistry;
use crate::relay::{reaper, static_files};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared state for the relay (registry plus the config slices handlers need).
#[derive(Clone)]
pub(crate) struct RelayState {
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) static_dir: Option<PathBuf>,
    pub(crate) port: u16,
}

/// Run the relay server; binds to `config.relay.bind:config.relay.port`.
/// Blocks until shutdown (e.g. Ctrl+C). Sessions are in-memory only and die
/// with the process.
pub async fn run_relay(config: Config) -> Result<()> {
    let state = RelayState {
        registry: Arc::new(SessionRegistry::new()),
        static_dir: config.relay.static_dir.clone(),
        port: config.relay.port,
    };

    reaper::spawn(state.registry.clone());

    let app = Router::new()
        .route("/healthz", get(health_http))
        .route("/ws", get(ws_handler))
        .fallback(static_files::serve)
        .with_state(state);

    let bind_addr = format!("{}:{}", config.relay.bind.trim(), config.relay.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("relay listening on {}", bind_addr);
    match local_ip() {
        Some(ip) => log::info!(
            "reachable at http://localhost:{}/ and http://{}:{}/",
            config.relay.port,
            ip,
            config.relay.port
        ),
        None => log::info!("reachable at http://localhost:{}/", config.relay.port),
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server exited")?;
    log::info!("relay stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received");
}

/// Best-effort LAN address for the startup log. Connecting a UDP socket picks
/// the outbound interface without sending anything.
fn local_ip() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|a| a.ip())
}

/// GET /healthz returns a simple health JSON (for probes).
async fn health_http(State(state): State<RelayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.port,
        "sessions": state.registry.len().await,
    }))
}

/// GET /ws upgrades to WebSocket; role and session code come from the query.
async fn ws_handler(
    State(state): State<RelayState>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

async fn handle_socket(mut socket: WebSocket, state: RelayState, query: ConnectQuery) {
    match query.role() {
        Some(Role::Primary) => handle_primary(socket, state).await,
        Some(Role::Secondary) => {
            let code = query.session_code().map(str::to_string);
            handle_secondary(socket, state, code).await;
        }
        None => {
            log::info!(
                "rejecting connection with unknown client type {:?}",
                query.client_type
            );
            reject(&mut socket, "unknown client type").await;
        }
    }
}

/// Send an error envelope and close the socket. Used for connections that
/// never make it into the registry.
async fn reject(socket: &mut WebSocket, message: &str) {
    let envelope = ServerMessage::Error {
        message: message.to_string(),
    };
    let _ = socket
        .send(Message::Text(
            serde_json::to_string(&envelope).unwrap_or_default(),
        ))
        .await;
    let _ = socket.send(Message::Close(None)).await;
}

/// Map one socket read to a connection event. Transport errors are surfaced
/// as `Error` (logged by the loop, no cleanup); cleanup happens only on
/// `Closed`, which errors are expected to be followed by.
fn next_event(read: Option<Result<Message, axum::Error>>) -> Option<ConnectionEvent> {
    match read {
        Some(Ok(Message::Text(text))) => Some(ConnectionEvent::Frame(text)),
        Some(Ok(Message::Close(_))) | None => Some(ConnectionEvent::Closed),
        // Pings and pongs are answered by the transport; binary is not part
        // of the protocol.
        Some(Ok(_)) => None,
        Some(Err(e)) => Some(ConnectionEvent::Error(e.to_string())),
    }
}

/// Primary lifecycle: create a session, report the code, relay until close,
/// destroy the session.
async fn handle_primary(mut socket: WebSocket, state: RelayState) {
    let (conn, mut outbound) = Connection::accept(Role::Primary);

    let code = match state.registry.create_session(conn.clone()).await {
        Ok(code) => code,
        Err(e) => {
            log::warn!("rejecting primary {}: {}", conn.id(), e);
            reject(&mut socket, "no session codes available").await;
            return;
        }
    };
    log::info!("primary {} connected, session {}", conn.id(), code);

    let hello_ok = send_direct(
        &mut socket,
        &ServerMessage::SessionCode {
            session_code: code.clone(),
        },
    )
    .await
        && send_direct(
            &mut socket,
            &ServerMessage::Status {
                secondaries_connected: 0,
            },
        )
        .await;

    if hello_ok {
        loop {
            tokio::select! {
                queued = outbound.recv() => {
                    let Some(text) = queued else { break };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                read = socket.recv() => {
                    match next_event(read) {
                        Some(ConnectionEvent::Frame(text)) => {
                            relay_frame(&state, &code, Role::Primary, &text).await;
                        }
                        Some(ConnectionEvent::Closed) => break,
                        Some(ConnectionEvent::Error(e)) => {
                            log::debug!("primary {} transport error: {}", conn.id(), e);
                        }
                        None => {}
                    }
                }
            }
        }
    }

    // Close event: the session dies with its primary. A bound secondary is
    // left connected; its next send finds no session and is dropped.
    state.registry.destroy_session(&code).await;
    log::info!(
        "primary {} disconnected, session {} destroyed",
        conn.id(),
        code
    );
}

/// Secondary lifecycle: bind to the session, relay until close, unbind.
async fn handle_secondary(mut socket: WebSocket, state: RelayState, code: Option<String>) {
    let Some(code) = code else {
        log::info!("rejecting secondary with no session code");
        reject(&mut socket, "invalid session code").await;
        return;
    };

    let (conn, mut outbound) = Connection::accept(Role::Secondary);
    match state.registry.bind_secondary(&code, conn.clone()).await {
        Ok(primary) => {
            // Peer-gone on this notify is the primary task's cleanup to run.
            let _ = primary.send(&ServerMessage::Status {
                secondaries_connected: 1,
            });
        }
        Err(e) => {
            log::info!("rejecting secondary for session {}: {}", code, e);
            reject(&mut socket, &e.to_string()).await;
            return;
        }
    }
    log::info!("secondary {} bound to session {}", conn.id(), code);

    loop {
        tokio::select! {
            queued = outbound.recv() => {
                let Some(text) = queued else { break };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            read = socket.recv() => {
                match next_event(read) {
                    Some(ConnectionEvent::Frame(text)) => {
                        relay_frame(&state, &code, Role::Secondary, &text).await;
                    }
                    Some(ConnectionEvent::Closed) => break,
                    Some(ConnectionEvent::Error(e)) => {
                        log::debug!("secondary {} transport error: {}", conn.id(), e);
                    }
                    None => {}
                }
            }
        }
    }

    // Only clears the binding if this connection still owns it; on primary
    // disconnect the session is already gone and this is a no-op.
    if let Some(primary) = state.registry.unbind_secondary(&code, conn.id()).await {
        let _ = primary.send(&ServerMessage::Status {
            secondaries_connected: 0,
        });
    }
    log::info!("secondary {} disconnected from session {}", conn.id(), code);
}

/// Relay one inbound frame to the counterpart, tagging it on the way.
/// Malformed frames are logged and dropped; a missing or closed counterpart
/// drops the frame silently (that is a race, not a protocol violation).
async fn relay_frame(state: &RelayState, code: &str, from: Role, text: &str) {
    let counterpart = match from {
        Role::Secondary => state.registry.lookup_primary(code).await,
        Role::Primary => state.registry.lookup_secondary(code).await,
    };
    let Some(counterpart) = counterpart else {
        return;
    };
    if !counterpart.is_open() {
        return;
    }
    match protocol::tag_for_relay(text) {
        Some(tagged) => {
            // Fire-and-forget: a send error means the peer just went away.
            let _ = counterpart.send_raw(tagged);
        }
        None => {
            log::debug!("dropping malformed frame from {} on session {}", from, code);
        }
    }
}

/// Write a server envelope straight to the socket (pre-loop handshake path).
async fn send_direct(socket: &mut WebSocket, msg: &ServerMessage) -> bool {
    socket
        .send(Message::Text(
            serde_json::to_string(msg).unwrap_or_default(),
        ))
        .await
        .is_ok()
}
