//! Session registry: the authoritative `code -> Session` map.
//!
//! Every pairing, relay-routing, and teardown decision goes through this one
//! mutation surface. Each operation takes the registry lock for its whole
//! check-and-mutate, so no two secondaries can bind to the same session and a
//! destroyed session is never used, under any interleaving of connect and
//! disconnect events. The registry deals only in bookkeeping; it never closes
//! a socket (that is the connection task's job).

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::relay::codes::{self, CodeSpaceExhausted};
use crate::relay::connection::Connection;

/// Pairing state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Primary connected, secondary slot free.
    AwaitingSecondary,
    /// A live secondary is bound.
    Paired,
}

/// One live pairing session. Exists exactly as long as its primary connection
/// does (plus at most one reaper interval when the close went unobserved).
#[derive(Debug)]
struct Session {
    primary: Connection,
    secondary: Option<Connection>,
    state: SessionState,
    /// For debugging only; expiry is liveness-driven, never time-driven.
    created_at: DateTime<Utc>,
}

/// Why a secondary could not bind.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BindError {
    #[error("invalid session code")]
    UnknownCode,
    #[error("session already has a secondary connected")]
    SlotOccupied,
}

/// Read-only view of a session for inspection and tests.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub code: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub secondary_bound: bool,
}

/// In-memory store of live sessions. Shared across connection tasks and the
/// reaper.
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, Session>>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a session for a freshly connected primary. Generates a code that
    /// is unused among live sessions and inserts the session atomically.
    pub async fn create_session(&self, primary: Connection) -> Result<String, CodeSpaceExhausted> {
        let mut g = self.inner.write().await;
        let code = codes::generate(&mut rand::thread_rng(), |c| g.contains_key(c))?;
        g.insert(
            code.clone(),
            Session {
                primary,
                secondary: None,
                state: SessionState::AwaitingSecondary,
                created_at: Utc::now(),
            },
        );
        Ok(code)
    }

    /// Bind a secondary to the session with this code. On success the session
    /// transitions to `Paired` and the primary's handle is returned so the
    /// caller can notify it. A dead leftover binding does not occupy the slot.
    pub async fn bind_secondary(
        &self,
        code: &str,
        secondary: Connection,
    ) -> Result<Connection, BindError> {
        let mut g = self.inner.write().await;
        let session = g.get_mut(code).ok_or(BindError::UnknownCode)?;
        if let Some(existing) = &session.secondary {
            if existing.is_open() {
                return Err(BindError::SlotOccupied);
            }
        }
        session.secondary = Some(secondary);
        session.state = SessionState::Paired;
        Ok(session.primary.clone())
    }

    /// Clear the secondary binding, but only if it still belongs to the named
    /// connection (a later secondary may have taken the slot in the meantime).
    /// Idempotent; returns the primary's handle when a binding was cleared so
    /// the caller can notify it.
    pub async fn unbind_secondary(&self, code: &str, secondary_id: Uuid) -> Option<Connection> {
        let mut g = self.inner.write().await;
        let session = g.get_mut(code)?;
        if session.secondary.as_ref().map(Connection::id) != Some(secondary_id) {
            return None;
        }
        session.secondary = None;
        session.state = SessionState::AwaitingSecondary;
        Some(session.primary.clone())
    }

    /// Remove the session entirely, whatever its state. Idempotent. Returns
    /// whether a session was actually removed.
    pub async fn destroy_session(&self, code: &str) -> bool {
        self.inner.write().await.remove(code).is_some()
    }

    /// Resolve the primary connection for relaying secondary traffic.
    pub async fn lookup_primary(&self, code: &str) -> Option<Connection> {
        self.inner.read().await.get(code).map(|s| s.primary.clone())
    }

    /// Resolve the bound secondary, if any, for relaying primary traffic.
    pub async fn lookup_secondary(&self, code: &str) -> Option<Connection> {
        self.inner
            .read()
            .await
            .get(code)
            .and_then(|s| s.secondary.clone())
    }

    /// Read-only view of one session.
    pub async fn lookup(&self, code: &str) -> Option<SessionSnapshot> {
        self.inner.read().await.get(code).map(|s| SessionSnapshot {
            code: code.to_string(),
            state: s.state,
            created_at: s.created_at,
            secondary_bound: s.secondary.as_ref().is_some_and(Connection::is_open),
        })
    }

    /// Remove every session whose primary connection is no longer open,
    /// returning the removed codes. Liveness is re-checked under the lock at
    /// sweep time, so a session that reconnected state between scans is safe.
    pub async fn sweep_dead(&self) -> Vec<String> {
        let mut g = self.inner.write().await;
        let dead: Vec<String> = g
            .iter()
            .filter(|(_, s)| !s.primary.is_open())
            .map(|(code, _)| code.clone())
            .collect();
        for code in &dead {
            g.remove(code);
        }
        dead
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
