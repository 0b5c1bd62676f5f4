use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

pub mod mock;
pub mod websocket;

pub use mock::{MockPeer, MockServer, MockTransport};
pub use websocket::WebSocketTransport;

/// Close code sent when the tailer goes away on purpose.
pub const NORMAL_CLOSURE: u16 = 1000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection already closed")]
    Closed,
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("stream error: {0}")]
    Stream(String),
}

/// Lifecycle notifications emitted by a connection's driver task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Error(String),
    /// Always the last event of a connection.
    Closed { code: Option<u16>, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Opens push connections to the log feed.
///
/// `open` must not block: the handshake runs in the background and its result
/// arrives as [`TransportEvent::Opened`] or [`TransportEvent::Closed`].
pub trait LogTransport {
    fn open(&self, url: &Url) -> LogConnection;
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to one connection attempt.
#[derive(Debug)]
pub struct LogConnection {
    id: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    finished: bool,
}

impl LogConnection {
    /// Build a handle plus the driver-side channel ends.
    pub fn channel() -> (
        Self,
        mpsc::UnboundedReceiver<Outbound>,
        mpsc::UnboundedSender<TransportEvent>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            outbound: outbound_tx,
            events: events_rx,
            finished: false,
        };
        (connection, outbound_rx, events_tx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn send(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.outbound
            .send(Outbound::Text(text.into()))
            .map_err(|_| TransportError::Closed)
    }

    pub fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), TransportError> {
        self.outbound
            .send(Outbound::Close {
                code,
                reason: reason.into(),
            })
            .map_err(|_| TransportError::Closed)
    }

    /// Next lifecycle event. A driver that vanished without saying goodbye is
    /// reported as an abnormal close.
    pub async fn next_event(&mut self) -> TransportEvent {
        if self.finished {
            return std::future::pending().await;
        }
        let event = self.events.recv().await.unwrap_or(TransportEvent::Closed {
            code: None,
            reason: "driver stopped".into(),
        });
        if matches!(event, TransportEvent::Closed { .. }) {
            self.finished = true;
        }
        event
    }

    /// Drain events until the connection reports closed.
    pub async fn closed(&mut self) {
        while !self.finished {
            self.next_event().await;
        }
    }
}
