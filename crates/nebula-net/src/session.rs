//! Client-side session manager.
//!
//! Wraps a single [`Transport`], tracks the connection lifecycle
//! (Closed → Connecting → Connected), retries closed connections according to
//! a [`ReconnectBudget`], and fans inbound messages out through an
//! [`EventRegistry`].
//!
//! Everything runs on the caller's thread. Transport notifications are
//! queued by the transport and applied by [`SessionManager::poll`] once per
//! game tick, or directly via [`SessionManager::handle_event`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};

use crate::messages::{CommandId, Message};
use crate::reconnection::{Backoff, Immediate, ReconnectBudget, ReconnectDecision};
use crate::routing::{Callback, Dispatch, EventRegistry};
use crate::state::{ConnectionState, ConnectionStateWatch};
use crate::transport::{ConnectTarget, Transport, TransportError, TransportEvent, event_channel};

/// Capacity of the lifecycle broadcast channel. Slow subscribers lag rather
/// than block the session.
const LIFECYCLE_CAPACITY: usize = 64;

/// Lifecycle notifications for the embedding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The transport reported a live connection.
    Connected,
    /// A closed connection will be retried after `delay`.
    Reconnecting {
        /// 1-based attempt number since the last successful connection.
        attempt: u32,
        /// Delay chosen by the backoff strategy.
        delay: Duration,
    },
    /// The connection closed and the reconnect budget allows no retry.
    Ended,
    /// The transport reported an error. No state change follows from it.
    TransportError {
        /// Description from the transport.
        message: String,
    },
}

/// Errors returned by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// `init` has not been called.
    #[error("session manager is not initialized")]
    NotInitialized,
    /// The session is not in the Connected state.
    #[error("cannot send {command}: session is {state}")]
    NotConnected {
        /// Command of the rejected message.
        command: CommandId,
        /// State at the time of the call.
        state: ConnectionState,
    },
    /// The transport refused the message.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Wiring installed by [`SessionManager::init`].
struct Wiring {
    transport: Box<dyn Transport>,
    target: ConnectTarget,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Connection lifecycle, reconnect policy and command dispatch for one
/// transport.
pub struct SessionManager {
    wiring: Option<Wiring>,
    budget: ReconnectBudget,
    backoff: Box<dyn Backoff>,
    /// Reconnect attempts since the last successful connection.
    attempt: u32,
    /// Scheduled reconnect for non-zero backoff delays.
    reconnect_at: Option<Instant>,
    /// `Ended` was broadcast and no connection attempt has been made since.
    ended: bool,
    state: ConnectionStateWatch,
    registry: EventRegistry,
    lifecycle: broadcast::Sender<SessionEvent>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionManager {
    /// Create an uninitialized manager with the immediate-retry backoff.
    pub fn new() -> Self {
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CAPACITY);
        Self {
            wiring: None,
            budget: ReconnectBudget::NEVER,
            backoff: Box::new(Immediate),
            attempt: 0,
            reconnect_at: None,
            ended: false,
            state: ConnectionStateWatch::new(),
            registry: EventRegistry::new(),
            lifecycle,
        }
    }

    /// Replace the backoff strategy. The budget semantics are unaffected.
    pub fn with_backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Box::new(backoff);
        self
    }

    /// Replace the backoff strategy on an existing manager.
    pub fn set_backoff(&mut self, backoff: impl Backoff + 'static) {
        self.backoff = Box::new(backoff);
    }

    /// Wire up a transport, connection target and reconnect budget.
    ///
    /// Must be called before [`connect`](Self::connect). Calling it again
    /// replaces the transport, target and budget and discards notifications
    /// still queued from the previous transport. Connection state and
    /// registered handlers are kept; resetting them is the caller's job.
    pub fn init(
        &mut self,
        transport: impl Transport + 'static,
        target: impl Into<ConnectTarget>,
        budget: impl Into<ReconnectBudget>,
    ) {
        let mut transport: Box<dyn Transport> = Box::new(transport);
        let (sink, events) = event_channel();
        transport.bind(sink);

        let target = target.into();
        self.budget = budget.into();
        self.attempt = 0;
        self.reconnect_at = None;
        self.ended = false;
        tracing::debug!("Session initialized for {target} (reconnect: {})", self.budget);

        self.wiring = Some(Wiring {
            transport,
            target,
            events,
        });
    }

    /// Request a connection.
    ///
    /// The transport is only asked to connect when the state is
    /// [`ConnectionState::Closed`]. The state is then set to
    /// [`ConnectionState::Connecting`] unconditionally, even when already
    /// connecting or connected; callers observing the watch will see that
    /// write.
    pub fn connect(&mut self) {
        if self.state.current() == ConnectionState::Closed {
            match self.wiring.as_mut() {
                Some(wiring) => {
                    tracing::info!("Connecting to {}", wiring.target);
                    self.reconnect_at = None;
                    self.ended = false;
                    wiring.transport.connect(&wiring.target);
                }
                None => tracing::warn!("connect() called before init(); no transport to use"),
            }
        }
        self.state.set(ConnectionState::Connecting);
    }

    /// Send a message. Fails without touching the transport unless connected.
    pub fn send(&mut self, message: &Message) -> Result<(), SessionError> {
        let state = self.state.current();
        if state != ConnectionState::Connected {
            tracing::warn!("Not connected ({state}); dropping {}", message.command_id);
            return Err(SessionError::NotConnected {
                command: message.command_id,
                state,
            });
        }

        let wiring = self.wiring.as_mut().ok_or(SessionError::NotInitialized)?;
        wiring.transport.send(message).map_err(|e| {
            tracing::warn!("Transport rejected {}: {e}", message.command_id);
            SessionError::from(e)
        })
    }

    /// Register `callback`/`receiver` for the message's command, then send it.
    ///
    /// There is no request/response correlation: the handler stays
    /// registered and sees every later message with the same command, and
    /// stays registered even if the send fails.
    pub fn request<R: Send + Sync + 'static>(
        &mut self,
        message: &Message,
        callback: &Callback<R>,
        receiver: &Arc<R>,
    ) -> Result<(), SessionError> {
        self.registry.on(message.command_id, callback, receiver);
        self.send(message)
    }

    /// Like [`request`](Self::request), but the handler is dropped after the
    /// first message of that command arrives.
    pub fn request_once<R: Send + Sync + 'static>(
        &mut self,
        message: &Message,
        callback: &Callback<R>,
        receiver: &Arc<R>,
    ) -> Result<(), SessionError> {
        self.registry.once(message.command_id, callback, receiver);
        self.send(message)
    }

    /// Register a persistent handler for `command`.
    pub fn on<R: Send + Sync + 'static>(
        &mut self,
        command: CommandId,
        callback: &Callback<R>,
        receiver: &Arc<R>,
    ) {
        self.registry.on(command, callback, receiver);
    }

    /// Register a handler that fires at most once.
    pub fn once<R: Send + Sync + 'static>(
        &mut self,
        command: CommandId,
        callback: &Callback<R>,
        receiver: &Arc<R>,
    ) {
        self.registry.once(command, callback, receiver);
    }

    /// Remove every handler matching both `callback` and `receiver`.
    /// Returns the number removed.
    pub fn off<R: Send + Sync + 'static>(
        &mut self,
        command: CommandId,
        callback: &Callback<R>,
        receiver: &Arc<R>,
    ) -> usize {
        self.registry.off(command, callback, receiver)
    }

    /// Remove all handlers for `command`.
    pub fn clear(&mut self, command: CommandId) {
        self.registry.clear(command);
    }

    /// Close the transport for good.
    ///
    /// Spends the remaining reconnect budget and cancels any scheduled
    /// attempt. If the transport had a connection open or in flight, the
    /// close notification that follows ends the session. Otherwise there is
    /// nothing left to wait for and [`SessionEvent::Ended`] is broadcast
    /// straight away.
    pub fn shutdown(&mut self) {
        self.budget = ReconnectBudget::NEVER;
        let was_waiting = self.reconnect_at.take().is_some();

        let closing = match self.wiring.as_mut() {
            Some(wiring) => {
                tracing::info!("Shutting down connection to {}", wiring.target);
                wiring.transport.close()
            }
            None => false,
        };

        if !closing || was_waiting {
            tracing::debug!("Nothing left to close; session ended");
            self.end();
        }
    }

    /// Apply queued transport notifications and due reconnects.
    ///
    /// Returns the number of notifications processed.
    pub fn poll(&mut self) -> usize {
        self.poll_at(Instant::now())
    }

    /// [`poll`](Self::poll) against an explicit clock.
    ///
    /// Only notifications already queued on entry are applied. Anything the
    /// transport raises while they are processed waits for the next call, so
    /// a transport that fails instantly cannot spin this loop forever.
    pub fn poll_at(&mut self, now: Instant) -> usize {
        if let Some(due) = self.reconnect_at
            && now >= due
        {
            self.reconnect_at = None;
            self.connect();
        }

        let batch: Vec<TransportEvent> = match self.wiring.as_mut() {
            Some(wiring) => {
                let queued = wiring.events.len();
                std::iter::from_fn(|| wiring.events.try_recv().ok())
                    .take(queued)
                    .collect()
            }
            None => return 0,
        };

        let processed = batch.len();
        for event in batch {
            self.handle_event(event);
        }
        processed
    }

    /// Apply a single transport notification.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_transport_connected(),
            TransportEvent::Message(message) => {
                self.dispatch(message.command_id, &message.payload);
            }
            TransportEvent::Closed { reason } => self.on_transport_closed(&reason),
            TransportEvent::Error { message } => self.on_transport_error(message),
        }
    }

    /// Deliver a payload to the handlers of `command`.
    pub fn dispatch(&mut self, command: CommandId, payload: &Value) -> Dispatch {
        self.registry.dispatch(command, payload)
    }

    fn on_transport_connected(&mut self) {
        tracing::info!("Connection established");
        self.attempt = 0;
        self.state.set(ConnectionState::Connected);
        self.notify(SessionEvent::Connected);
    }

    fn on_transport_closed(&mut self, reason: &str) {
        match self.budget.on_closed() {
            ReconnectDecision::GiveUp => {
                // State is left as the last write put it; the session is over.
                tracing::warn!("Connection closed ({reason}); no reconnect attempts left");
                self.end();
            }
            ReconnectDecision::Retry => {
                self.attempt = self.attempt.saturating_add(1);
                let delay = self.backoff.delay(self.attempt);
                tracing::info!(
                    "Connection closed ({reason}); reconnect attempt {} in {delay:?} ({})",
                    self.attempt,
                    self.budget
                );
                self.state.set(ConnectionState::Closed);
                self.notify(SessionEvent::Reconnecting {
                    attempt: self.attempt,
                    delay,
                });

                if delay.is_zero() {
                    self.connect();
                } else {
                    self.reconnect_at = Instant::now().checked_add(delay);
                    if self.reconnect_at.is_none() {
                        tracing::warn!(
                            "Reconnect delay {delay:?} is out of range; waiting for a manual connect"
                        );
                    }
                }
            }
        }
    }

    fn on_transport_error(&mut self, message: String) {
        tracing::error!("Network error: {message}");
        self.notify(SessionEvent::TransportError { message });
    }

    /// Broadcast `Ended` once per run of connection attempts.
    fn end(&mut self) {
        if !self.ended {
            self.ended = true;
            self.notify(SessionEvent::Ended);
        }
    }

    fn notify(&self, event: SessionEvent) {
        let _ = self.lifecycle.send(event);
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    /// Subscribe to connection state changes.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Subscribe to lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.lifecycle.subscribe()
    }

    /// Remaining reconnect budget.
    pub fn reconnect_budget(&self) -> ReconnectBudget {
        self.budget
    }

    /// When the next scheduled reconnect fires, if one is pending.
    pub fn pending_reconnect(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// The target given to `init`.
    pub fn target(&self) -> Option<&ConnectTarget> {
        self.wiring.as_ref().map(|w| &w.target)
    }

    /// Read-only view of the handler registry.
    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }
}
