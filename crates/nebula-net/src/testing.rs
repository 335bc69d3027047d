//! Recording transport for unit tests.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::messages::Message;
use crate::transport::{ConnectTarget, EventSink, Transport, TransportError};

#[derive(Default)]
struct Recorded {
    sink: Option<EventSink>,
    targets: Vec<ConnectTarget>,
    sent: Vec<Message>,
    closes: usize,
    live: bool,
    fail_sends: bool,
    close_on_connect: bool,
}

/// Transport double. Clones share the same recording, so a test can keep
/// one handle while the session manager owns another.
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    inner: Arc<Mutex<Recorded>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap()
    }

    pub(crate) fn sink(&self) -> Option<EventSink> {
        self.lock().sink.clone()
    }

    pub(crate) fn connect_calls(&self) -> usize {
        self.lock().targets.len()
    }

    pub(crate) fn targets(&self) -> Vec<ConnectTarget> {
        self.lock().targets.clone()
    }

    pub(crate) fn last_target(&self) -> Option<ConnectTarget> {
        self.lock().targets.last().cloned()
    }

    pub(crate) fn sent(&self) -> Vec<Message> {
        self.lock().sent.clone()
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.lock().closes
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    /// Make every connect attempt fail straight away with a close notification.
    pub(crate) fn close_on_connect(&self, close: bool) {
        self.lock().close_on_connect = close;
    }
}

impl Transport for MockTransport {
    fn bind(&mut self, sink: EventSink) {
        self.lock().sink = Some(sink);
    }

    fn connect(&mut self, target: &ConnectTarget) {
        let mut rec = self.lock();
        rec.targets.push(target.clone());
        rec.live = !rec.close_on_connect;
        if rec.close_on_connect
            && let Some(sink) = &rec.sink
        {
            sink.closed("refused");
        }
    }

    fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        let mut rec = self.lock();
        if rec.fail_sends {
            return Err(TransportError::NotConnected);
        }
        rec.sent.push(message.clone());
        Ok(())
    }

    /// Reports the link as open after any connect that was not refused.
    /// The test drives the matching `Closed` notification itself.
    fn close(&mut self) -> bool {
        let mut rec = self.lock();
        rec.closes += 1;
        std::mem::replace(&mut rec.live, false)
    }
}
