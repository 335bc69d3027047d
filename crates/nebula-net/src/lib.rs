//! Client network session: connection lifecycle, reconnect budget, and
//! command-tagged message dispatch over a pluggable transport.

pub mod framing;
pub mod messages;
pub mod reconnection;
pub mod routing;
pub mod session;
pub mod state;
pub mod tcp;
pub mod transport;

#[cfg(test)]
mod testing;

pub use framing::{FrameConfig, FrameError};
pub use messages::{CommandId, Message, PROTOCOL_VERSION, decode_message, encode_message};
pub use reconnection::{
    Backoff, BackoffConfig, ExponentialBackoff, FixedDelay, Immediate, ReconnectBudget,
    ReconnectDecision,
};
pub use routing::{Callback, Dispatch, EventRegistry, callback};
pub use session::{SessionError, SessionEvent, SessionManager};
pub use state::{ConnectionState, ConnectionStateWatch};
pub use tcp::TcpTransport;
pub use transport::{ConnectTarget, EventSink, Transport, TransportError, TransportEvent};
