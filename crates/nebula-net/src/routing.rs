//! Command dispatch: fan incoming messages out to registered handlers.
//!
//! The [`EventRegistry`] maps each [`CommandId`] to an ordered list of
//! handler entries. An entry is a `(callback, receiver)` pair; both halves
//! are compared by identity, so the same callback registered for two
//! receivers is two independent entries, and removing one leaves the other.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;

use crate::messages::CommandId;

/// A handler callback. Invoked with its receiver as context and the
/// message payload as argument.
///
/// Identity is the `Arc` allocation: clone the `Arc` to register or remove
/// the same callback again.
pub type Callback<R> = Arc<dyn Fn(&R, &Value) + Send + Sync>;

/// Wrap a closure as a [`Callback`].
pub fn callback<R, F>(f: F) -> Callback<R>
where
    F: Fn(&R, &Value) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Identity of a `(callback, receiver)` pair.
///
/// Both addresses stay valid for as long as the entry exists because the
/// entry holds a strong reference to each allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HandlerKey {
    callback: usize,
    receiver: usize,
}

impl HandlerKey {
    fn of<R: Send + Sync + 'static>(callback: &Callback<R>, receiver: &Arc<R>) -> Self {
        Self {
            callback: Arc::as_ptr(callback).cast::<()>().addr(),
            receiver: Arc::as_ptr(receiver).cast::<()>().addr(),
        }
    }
}

struct HandlerEntry {
    key: HandlerKey,
    once: bool,
    invoke: Box<dyn Fn(&Value) + Send + Sync>,
}

impl HandlerEntry {
    fn new<R: Send + Sync + 'static>(callback: &Callback<R>, receiver: &Arc<R>, once: bool) -> Self {
        let cb = Arc::clone(callback);
        let recv = Arc::clone(receiver);
        Self {
            key: HandlerKey::of(callback, receiver),
            once,
            invoke: Box::new(move |payload| cb(&recv, payload)),
        }
    }
}

/// Result of a [`EventRegistry::dispatch`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Nothing is registered for the command. Informational, not an error.
    UnknownCommand,
    /// Handlers were run.
    Delivered {
        /// Handlers invoked, including ones that panicked.
        invoked: usize,
        /// Handlers that panicked. They did not stop the rest from running.
        failed: usize,
    },
}

/// Mapping from command to its handlers, in registration order.
#[derive(Default)]
pub struct EventRegistry {
    handlers: HashMap<CommandId, Vec<HandlerEntry>>,
}

impl EventRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a persistent handler for `command`. Duplicates accumulate.
    pub fn on<R: Send + Sync + 'static>(
        &mut self,
        command: CommandId,
        callback: &Callback<R>,
        receiver: &Arc<R>,
    ) {
        self.push(command, HandlerEntry::new(callback, receiver, false));
    }

    /// Append a handler that is removed after its first invocation.
    pub fn once<R: Send + Sync + 'static>(
        &mut self,
        command: CommandId,
        callback: &Callback<R>,
        receiver: &Arc<R>,
    ) {
        self.push(command, HandlerEntry::new(callback, receiver, true));
    }

    fn push(&mut self, command: CommandId, entry: HandlerEntry) {
        self.handlers.entry(command).or_default().push(entry);
    }

    /// Remove every entry for `command` whose callback *and* receiver match.
    ///
    /// Returns the number of entries removed. An unknown command is logged
    /// and yields 0. The command itself is dropped once its list is empty.
    pub fn off<R: Send + Sync + 'static>(
        &mut self,
        command: CommandId,
        callback: &Callback<R>,
        receiver: &Arc<R>,
    ) -> usize {
        let Some(entries) = self.handlers.get_mut(&command) else {
            tracing::debug!("off: no handlers registered for {command}");
            return 0;
        };

        let key = HandlerKey::of(callback, receiver);
        let before = entries.len();
        entries.retain(|e| e.key != key);
        let removed = before - entries.len();

        if entries.is_empty() {
            self.handlers.remove(&command);
        }
        removed
    }

    /// Drop every handler for `command`. No-op when none exist.
    pub fn clear(&mut self, command: CommandId) {
        self.handlers.remove(&command);
    }

    /// Invoke every handler for `command` in registration order.
    ///
    /// A panicking handler is logged and counted; the remaining handlers of
    /// the same dispatch still run. One-shot entries are removed afterwards.
    pub fn dispatch(&mut self, command: CommandId, payload: &Value) -> Dispatch {
        let Some(entries) = self.handlers.get_mut(&command) else {
            tracing::debug!("Received unknown command {command}");
            return Dispatch::UnknownCommand;
        };

        let mut failed = 0;
        for entry in entries.iter() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (entry.invoke)(payload)));
            if outcome.is_err() {
                failed += 1;
                tracing::error!("Handler for {command} panicked; continuing dispatch");
            }
        }
        let invoked = entries.len();

        entries.retain(|e| !e.once);
        if entries.is_empty() {
            self.handlers.remove(&command);
        }

        Dispatch::Delivered { invoked, failed }
    }

    /// Number of handlers registered for `command`.
    pub fn handler_count(&self, command: CommandId) -> usize {
        self.handlers.get(&command).map_or(0, Vec::len)
    }

    /// True if at least one handler is registered for `command`.
    pub fn contains(&self, command: CommandId) -> bool {
        self.handlers.contains_key(&command)
    }

    /// Commands with at least one handler (useful for startup logging).
    pub fn registered_commands(&self) -> impl Iterator<Item = &CommandId> {
        self.handlers.keys()
    }
}
