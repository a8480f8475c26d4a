//! Relay: HTTP + WebSocket session pairing plane.
//!
//! Single port serves HTTP and WebSocket. A primary connects on `/ws` and
//! receives a short session code; a secondary joins with that code and
//! traffic is relayed between the two for the life of the pairing.

pub mod codes;
pub mod connection;
pub mod protocol;
pub mod reaper;
pub mod registry;
mod server;
mod static_files;

pub use codes::CodeSpaceExhausted;
pub use connection::{Connection, ConnectionEvent, SendError};
pub use protocol::{ConnectQuery, Role, ServerMessage};
pub use registry::{BindError, SessionRegistry, SessionState};
pub use server::run_relay;
