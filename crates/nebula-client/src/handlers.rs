//! Command handlers installed by the client binary.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use nebula_net::{Callback, CommandId, Message, SessionError, SessionManager, callback};
use serde_json::{Value, json};
use tracing::{debug, info};

/// Keep-alive ping, echoed back by the server.
pub const HEARTBEAT: CommandId = CommandId(1);
/// Free-form server announcement.
pub const NOTICE: CommandId = CommandId(2);

/// Counters updated by the handlers.
#[derive(Debug, Default)]
pub struct ClientStats {
    heartbeats_sent: AtomicU64,
    heartbeats_acked: AtomicU64,
    notices: AtomicU64,
}

impl ClientStats {
    pub fn heartbeats_sent(&self) -> u64 {
        self.heartbeats_sent.load(Ordering::Relaxed)
    }

    pub fn heartbeats_acked(&self) -> u64 {
        self.heartbeats_acked.load(Ordering::Relaxed)
    }

    pub fn notices(&self) -> u64 {
        self.notices.load(Ordering::Relaxed)
    }
}

/// Handler set shared with the session for the lifetime of the process.
pub struct ClientHandlers {
    stats: Arc<ClientStats>,
    on_heartbeat: Callback<ClientStats>,
    on_notice: Callback<ClientStats>,
}

impl ClientHandlers {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(ClientStats::default()),
            on_heartbeat: callback(|stats: &ClientStats, payload: &Value| {
                let acked = stats.heartbeats_acked.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("Heartbeat ack #{acked}: {payload}");
            }),
            on_notice: callback(|stats: &ClientStats, payload: &Value| {
                stats.notices.fetch_add(1, Ordering::Relaxed);
                match payload.get("text").and_then(Value::as_str) {
                    Some(text) => info!("Server notice: {text}"),
                    None => info!("Server notice: {payload}"),
                }
            }),
        }
    }

    pub fn stats(&self) -> &Arc<ClientStats> {
        &self.stats
    }

    /// Register every handler on `session`.
    pub fn install(&self, session: &mut SessionManager) {
        session.on(HEARTBEAT, &self.on_heartbeat, &self.stats);
        session.on(NOTICE, &self.on_notice, &self.stats);
    }

    /// Remove every handler from `session`.
    pub fn uninstall(&self, session: &mut SessionManager) {
        session.off(HEARTBEAT, &self.on_heartbeat, &self.stats);
        session.off(NOTICE, &self.on_notice, &self.stats);
    }

    /// Send the next keep-alive. Only counted once the session accepts it;
    /// a rejected heartbeat reuses its sequence number next time.
    pub fn send_heartbeat(&self, session: &mut SessionManager) -> Result<(), SessionError> {
        let seq = self.stats.heartbeats_sent() + 1;
        session.send(&Message::new(HEARTBEAT, json!({ "seq": seq })))?;
        self.stats.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Default for ClientHandlers {
    fn default() -> Self {
        Self::new()
    }
}
