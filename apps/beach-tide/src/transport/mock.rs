use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use url::Url;

use super::{LogConnection, LogTransport, Outbound, TransportEvent};

/// In-process transport for driving a tail session without a socket.
///
/// Every `open` parks a [`MockPeer`] on the paired [`MockServer`], where a test
/// decides whether the attempt opens, streams, fails or closes.
#[derive(Clone)]
pub struct MockTransport {
    shared: Arc<Mutex<MockState>>,
}

#[derive(Clone)]
pub struct MockServer {
    shared: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    pending: VecDeque<MockPeer>,
    opened: Vec<Url>,
}

impl MockTransport {
    pub fn new() -> (Self, MockServer) {
        let shared = Arc::new(Mutex::new(MockState::default()));
        (
            Self {
                shared: shared.clone(),
            },
            MockServer { shared },
        )
    }
}

impl LogTransport for MockTransport {
    fn open(&self, url: &Url) -> LogConnection {
        let (connection, outbound, events) = LogConnection::channel();
        let mut state = self.shared.lock().unwrap();
        state.opened.push(url.clone());
        state.pending.push_back(MockPeer {
            events,
            outbound,
        });
        connection
    }
}

impl MockServer {
    /// Number of connection attempts made so far.
    pub fn attempts(&self) -> usize {
        self.shared.lock().unwrap().opened.len()
    }

    pub fn urls(&self) -> Vec<Url> {
        self.shared.lock().unwrap().opened.clone()
    }

    /// Take the oldest connection attempt not yet claimed by the test.
    pub fn accept(&self) -> Option<MockPeer> {
        self.shared.lock().unwrap().pending.pop_front()
    }
}

/// Server side of one mock connection attempt.
pub struct MockPeer {
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl MockPeer {
    pub fn open(&self) {
        let _ = self.events.send(TransportEvent::Opened);
    }

    pub fn push(&self, text: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Message(text.into()));
    }

    pub fn fail(&self, error: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Error(error.into()));
        let _ = self.events.send(TransportEvent::Closed {
            code: None,
            reason: "error".into(),
        });
    }

    pub fn close(&self, code: u16) {
        let _ = self.events.send(TransportEvent::Closed {
            code: Some(code),
            reason: String::new(),
        });
    }

    /// Frames the client has written so far.
    pub fn outbound(&mut self) -> Vec<Outbound> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Answer a pending client close request the way a server would.
    pub fn acknowledge_close(&mut self) -> Option<u16> {
        let code = self.outbound().into_iter().find_map(|frame| match frame {
            Outbound::Close { code, .. } => Some(code),
            Outbound::Text(_) => None,
        })?;
        self.close(code);
        Some(code)
    }
}
