//! The transport capability the session manager drives.
//!
//! A [`Transport`] performs the actual I/O. It never calls back into the
//! session manager directly; instead it reports what happened through the
//! [`EventSink`] handed to it by [`Transport::bind`], and the manager applies
//! those notifications on its own tick.

use std::fmt;

use tokio::sync::mpsc;

use crate::framing::FrameError;
use crate::messages::Message;

/// Where the transport should connect.
///
/// Resolved once at init and reused for every reconnect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    /// Opaque address string, e.g. `"ws://game.example:9000"` or `"127.0.0.1:7777"`.
    Address(String),
    /// Structured endpoint.
    Endpoint {
        /// Host name or IP.
        host: String,
        /// Port number.
        port: u16,
        /// Scheme such as `tcp` or `ws`.
        protocol: String,
    },
}

impl ConnectTarget {
    /// Build a structured endpoint target.
    pub fn endpoint(host: impl Into<String>, port: u16, protocol: impl Into<String>) -> Self {
        Self::Endpoint {
            host: host.into(),
            port,
            protocol: protocol.into(),
        }
    }

    /// The `host:port` part of the target, with any `scheme://` prefix and
    /// trailing path removed.
    pub fn authority(&self) -> String {
        match self {
            Self::Address(addr) => {
                let rest = addr.split_once("://").map_or(addr.as_str(), |(_, r)| r);
                rest.split('/').next().unwrap_or(rest).to_string()
            }
            Self::Endpoint { host, port, .. } => format!("{host}:{port}"),
        }
    }
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(addr) => f.write_str(addr),
            Self::Endpoint {
                host,
                port,
                protocol,
            } => write!(f, "{protocol}://{host}:{port}"),
        }
    }
}

impl From<&str> for ConnectTarget {
    fn from(addr: &str) -> Self {
        Self::Address(addr.to_string())
    }
}

impl From<String> for ConnectTarget {
    fn from(addr: String) -> Self {
        Self::Address(addr)
    }
}

/// A notification raised by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection attempt succeeded.
    Connected,
    /// A complete message arrived.
    Message(Message),
    /// The connection closed, gracefully or because of an error.
    Closed {
        /// Human-readable cause.
        reason: String,
    },
    /// Something went wrong. Carries no state change by itself.
    Error {
        /// Human-readable description.
        message: String,
    },
}

/// Listener handle a transport uses to report notifications.
///
/// Cheap to clone, safe to move into background tasks. Reports sent after
/// the owning session manager is gone are silently discarded.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    /// Report a successful connection.
    pub fn connected(&self) {
        self.emit(TransportEvent::Connected);
    }

    /// Report an inbound message.
    pub fn message(&self, message: Message) {
        self.emit(TransportEvent::Message(message));
    }

    /// Report that the connection closed.
    pub fn closed(&self, reason: impl Into<String>) {
        self.emit(TransportEvent::Closed {
            reason: reason.into(),
        });
    }

    /// Report a transport error.
    pub fn error(&self, message: impl Into<String>) {
        self.emit(TransportEvent::Error {
            message: message.into(),
        });
    }

    /// Forward a raw event.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.tx.send(event);
    }
}

/// Create a connected sink/receiver pair.
pub fn event_channel() -> (EventSink, mpsc::UnboundedReceiver<TransportEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, rx)
}

/// Errors a transport can report from [`Transport::send`] or while encoding.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// There is no live connection to send on.
    #[error("transport is not connected")]
    NotConnected,
    /// The payload could not be turned into JSON.
    #[error("failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),
    /// The payload bytes were not valid JSON.
    #[error("failed to decode payload: {0}")]
    Decode(#[source] serde_json::Error),
    /// The binary envelope could not be (de)serialized.
    #[error("malformed envelope: {0}")]
    Envelope(#[source] postcard::Error),
    /// A message carried no bytes at all.
    #[error("empty message")]
    EmptyMessage,
    /// The peer speaks a different protocol version.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    /// Framing failed.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The I/O capability wrapped by a session manager.
///
/// Connection attempts complete asynchronously: `connect` only starts one,
/// and the outcome arrives later as [`TransportEvent::Connected`] or
/// [`TransportEvent::Closed`] on the bound sink.
pub trait Transport {
    /// Install the listener that receives this transport's notifications.
    /// Called once per session-manager init; a later call replaces the sink.
    fn bind(&mut self, sink: EventSink);

    /// Begin a connection attempt to `target`.
    fn connect(&mut self, target: &ConnectTarget);

    /// Transmit a message.
    fn send(&mut self, message: &Message) -> Result<(), TransportError>;

    /// Close the connection or abandon the attempt in flight.
    ///
    /// Returns `true` when there was one, in which case a
    /// [`TransportEvent::Closed`] follows on the sink. `false` means nothing
    /// was open and no notification will come.
    fn close(&mut self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn bind(&mut self, sink: EventSink) {
        (**self).bind(sink);
    }

    fn connect(&mut self, target: &ConnectTarget) {
        (**self).connect(target);
    }

    fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        (**self).send(message)
    }

    fn close(&mut self) -> bool {
        (**self).close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::CommandId;

    #[test]
    fn test_address_authority_strips_scheme_and_path() {
        let target = ConnectTarget::from("ws://game.example:9000/socket");
        assert_eq!(target.authority(), "game.example:9000");
    }

    #[test]
    fn test_bare_address_authority_unchanged() {
        let target = ConnectTarget::from("127.0.0.1:7777");
        assert_eq!(target.authority(), "127.0.0.1:7777");
    }

    #[test]
    fn test_endpoint_display_and_authority() {
        let target = ConnectTarget::endpoint("10.0.0.2", 7777, "tcp");
        assert_eq!(target.to_string(), "tcp://10.0.0.2:7777");
        assert_eq!(target.authority(), "10.0.0.2:7777");
    }

    #[tokio::test]
    async fn test_sink_delivers_in_order() {
        let (sink, mut rx) = event_channel();
        sink.connected();
        sink.message(Message::new(CommandId(3), "hi"));
        sink.closed("bye");

        assert_eq!(rx.recv().await.unwrap(), TransportEvent::Connected);
        assert_eq!(
            rx.recv().await.unwrap(),
            TransportEvent::Message(Message::new(CommandId(3), "hi"))
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            TransportEvent::Closed {
                reason: "bye".into()
            }
        );
    }

    #[test]
    fn test_sink_outliving_receiver_is_harmless() {
        let (sink, rx) = event_channel();
        drop(rx);
        sink.error("nobody listening");
    }
}
