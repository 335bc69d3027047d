//! Connection lifecycle state.
//!
//! State changes are published through a [`watch`] channel so any number of
//! consumers (UI, game systems) can react without polling the manager.

use std::fmt;

use tokio::sync::watch;

/// Lifecycle state of a session's single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection and no attempt in flight.
    #[default]
    Closed,
    /// A connection attempt was requested.
    Connecting,
    /// The transport reported a live connection.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Observable connection state backed by a [`watch`] channel.
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Create a new watch initialized to [`ConnectionState::Closed`].
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Closed);
        Self { tx }
    }

    /// Overwrite the current state, notifying subscribers.
    ///
    /// Writes that repeat the current value still count as a write; this is
    /// what lets `connect()` re-mark an already live session as connecting.
    pub fn set(&self, state: ConnectionState) {
        self.tx.send_replace(state);
    }

    /// Return a new subscriber receiver.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Return the current state without blocking.
    pub fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }
}
