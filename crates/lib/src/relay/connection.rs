//! Connection wrapper: a cloneable handle to one WebSocket client.
//!
//! The socket itself is owned by its connection task in `server.rs`; everyone
//! else (the registry, the counterpart's task) holds a `Connection` and sends
//! outbound frames through its channel. The task forwards them to the socket.
//! When the task ends the receiver is dropped, so `is_open` doubles as the
//! liveness signal the registry and reaper check.

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::relay::protocol::{Role, ServerMessage};

/// Send failed because the peer's connection task is gone. Callers must treat
/// this the same as an observed close.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("peer connection is closed")]
pub struct SendError;

/// Handle to one connected client: id, role, and the outbound frame channel.
#[derive(Debug, Clone)]
pub struct Connection {
    id: Uuid,
    role: Role,
    tx: mpsc::UnboundedSender<String>,
}

impl Connection {
    /// Wrap a newly accepted client. Returns the handle and the receiving end
    /// of its outbound channel; the connection task drains the receiver into
    /// the socket and drops it on close.
    pub fn accept(role: Role) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                role,
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// False once the connection task has ended and dropped its receiver.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a server envelope for delivery.
    pub fn send(&self, msg: &ServerMessage) -> Result<(), SendError> {
        self.send_raw(serde_json::to_string(msg).unwrap_or_default())
    }

    /// Queue an already-serialized frame for delivery (relay path).
    pub fn send_raw(&self, text: String) -> Result<(), SendError> {
        self.tx.send(text).map_err(|_| SendError)
    }
}

/// What a connection task observed on its socket. Transport errors are logged
/// by the dispatcher but never trigger cleanup on their own; only `Closed`
/// does (errors are expected to be followed by a close).
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A text frame arrived.
    Frame(String),
    /// The socket closed (close frame, EOF, or failed send).
    Closed,
    /// A transport-level error; the connection stays registered.
    Error(String),
}
