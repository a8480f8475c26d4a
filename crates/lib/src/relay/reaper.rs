//! Periodic sweep that evicts sessions whose primary died without an
//! observed close (e.g. the process on the other end was killed).
//!
//! The explicit close path in `server.rs` is the normal teardown; the reaper
//! is the backstop. It only deletes sessions the registry reconfirms dead at
//! sweep time, so it cannot race destructively with concurrent connects.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::relay::registry::SessionRegistry;

/// Sweep cadence. An unpaired session with a live primary survives forever;
/// only a dead primary marks a session for eviction.
pub const REAP_INTERVAL: Duration = Duration::from_secs(30);

/// Spawn the reaper task on the default interval.
pub fn spawn(registry: Arc<SessionRegistry>) -> JoinHandle<()> {
    spawn_with_interval(registry, REAP_INTERVAL)
}

/// Spawn the reaper with a custom interval (tests use a short one).
pub fn spawn_with_interval(registry: Arc<SessionRegistry>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            for code in registry.sweep_dead().await {
                log::info!("reaped session {} (primary connection dead)", code);
            }
        }
    })
}
