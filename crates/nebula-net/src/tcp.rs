//! TCP transport backed by a tokio runtime.
//!
//! Each `connect` spawns one connection task on the supplied runtime
//! handle. The task owns the socket: it decodes inbound frames into
//! [`TransportEvent::Message`]s, writes queued outbound messages, and reports
//! the connection's end exactly once through the bound [`EventSink`].

use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use crate::framing::{FrameConfig, FrameError, read_message, write_message};
use crate::messages::Message;
use crate::transport::{ConnectTarget, EventSink, Transport, TransportError};

/// Handles to the currently running connection task.
struct Link {
    outgoing: mpsc::UnboundedSender<Message>,
    shutdown_tx: watch::Sender<bool>,
}

/// Length-prefixed TCP transport.
pub struct TcpTransport {
    runtime: Handle,
    frame: FrameConfig,
    sink: Option<EventSink>,
    link: Option<Link>,
}

impl TcpTransport {
    /// Create a transport that runs its I/O on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self::with_frame_config(runtime, FrameConfig::default())
    }

    /// Create a transport with custom framing limits.
    pub fn with_frame_config(runtime: Handle, frame: FrameConfig) -> Self {
        Self {
            runtime,
            frame,
            sink: None,
            link: None,
        }
    }

    /// Signal the running connection task to stop. Returns whether the task
    /// was still alive, i.e. whether it will report a close.
    fn stop_link(&mut self) -> bool {
        let Some(link) = self.link.take() else {
            return false;
        };
        let _ = link.shutdown_tx.send(true);
        !link.outgoing.is_closed()
    }
}

impl Transport for TcpTransport {
    fn bind(&mut self, sink: EventSink) {
        self.sink = Some(sink);
    }

    fn connect(&mut self, target: &ConnectTarget) {
        let Some(sink) = self.sink.clone() else {
            tracing::warn!("TcpTransport::connect called before bind; ignoring");
            return;
        };
        self.stop_link();

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.link = Some(Link {
            outgoing,
            shutdown_tx,
        });

        let addr = target.authority();
        let frame = self.frame.clone();
        self.runtime.spawn(async move {
            let mut outgoing_rx = outgoing_rx;
            let mut shutdown_rx = shutdown_rx;

            let attempt = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => None,
                result = TcpStream::connect(&addr) => Some(result),
            };
            let reason = match attempt {
                None => "closed locally".to_string(),
                Some(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("set_nodelay failed for {addr}: {e}");
                    }
                    sink.connected();
                    run_link(stream, &mut outgoing_rx, &mut shutdown_rx, frame, &sink).await
                }
                Some(Err(e)) => {
                    sink.error(format!("connect to {addr} failed: {e}"));
                    format!("connect failed: {e}")
                }
            };
            sink.closed(reason);
            // The open queue marks the task as live for `stop_link`; release it
            // only once the close has been reported.
            drop(outgoing_rx);
        });
    }

    fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        let link = self.link.as_ref().ok_or(TransportError::NotConnected)?;
        link.outgoing
            .send(message.clone())
            .map_err(|_| TransportError::NotConnected)
    }

    fn close(&mut self) -> bool {
        self.stop_link()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        let _ = self.stop_link();
    }
}

/// Decode inbound frames until the stream ends. Returns the close reason.
async fn read_loop(mut reader: OwnedReadHalf, frame: FrameConfig, sink: EventSink) -> String {
    loop {
        match read_message(&mut reader, &frame).await {
            Ok(message) => sink.message(message),
            Err(TransportError::Frame(FrameError::ConnectionClosed)) => {
                return "closed by peer".to_string();
            }
            Err(e) => {
                sink.error(format!("read failed: {e}"));
                return format!("read failed: {e}");
            }
        }
    }
}

/// Pump one connection until the peer closes, an error occurs, or shutdown
/// is signalled. Returns the close reason.
///
/// Reads run on their own task because a frame read is not cancel-safe and
/// must never be interrupted by a competing write.
async fn run_link(
    stream: TcpStream,
    outgoing: &mut mpsc::UnboundedReceiver<Message>,
    shutdown_rx: &mut watch::Receiver<bool>,
    frame: FrameConfig,
    sink: &EventSink,
) -> String {
    let (reader, mut writer) = stream.into_split();
    let mut reads = tokio::spawn(read_loop(reader, frame.clone(), sink.clone()));

    let reason = loop {
        tokio::select! {
            finished = &mut reads => {
                return finished.unwrap_or_else(|e| format!("reader task failed: {e}"));
            }
            queued = outgoing.recv() => {
                let Some(message) = queued else {
                    break "transport dropped".to_string();
                };
                if let Err(e) = write_message(&mut writer, &message, &frame).await {
                    sink.error(format!("write of {} failed: {e}", message.command_id));
                    break format!("write failed: {e}");
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break "closed locally".to_string();
                }
            }
        }
    };

    reads.abort();
    reason
}
