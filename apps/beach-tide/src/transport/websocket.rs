use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, trace, warn};
use url::Url;

use super::{LogConnection, LogTransport, Outbound, TransportError, TransportEvent};

/// WebSocket implementation of [`LogTransport`].
///
/// Each `open` spawns a driver task on the current runtime; the task owns the
/// socket and talks to the [`LogConnection`] handle through channels only.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

impl LogTransport for WebSocketTransport {
    fn open(&self, url: &Url) -> LogConnection {
        let (connection, outbound, events) = LogConnection::channel();
        let id = connection.id();
        let url = url.to_string();
        tokio::spawn(async move {
            drive_websocket(id, url, outbound, events).await;
        });
        connection
    }
}

async fn drive_websocket(
    id: u64,
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    debug!(target: "beach_tide::transport", connection = id, %url, "opening websocket");

    let connect = connect_async(url.as_str());
    tokio::pin!(connect);
    let stream = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok((stream, _response)) => break stream,
                Err(err) => {
                    let err = TransportError::Handshake(err.to_string());
                    let _ = events.send(TransportEvent::Error(err.to_string()));
                    let _ = events.send(TransportEvent::Closed {
                        code: None,
                        reason: "handshake failed".into(),
                    });
                    return;
                }
            },
            request = outbound.recv() => match request {
                Some(Outbound::Text(_)) => {
                    debug!(target: "beach_tide::transport", connection = id, "dropping text queued before open");
                }
                Some(Outbound::Close { reason, .. }) => {
                    let _ = events.send(TransportEvent::Closed { code: None, reason });
                    return;
                }
                None => return,
            },
        }
    };

    if events.send(TransportEvent::Opened).is_err() {
        return;
    }
    debug!(target: "beach_tide::transport", connection = id, "websocket open");

    let (mut sink, mut source) = stream.split();
    let mut outbound_open = true;
    let mut requested_close: Option<(u16, String)> = None;

    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    trace!(target: "beach_tide::transport", connection = id, bytes = text.len(), "text frame");
                    if events.send(TransportEvent::Message(text)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    if events.send(TransportEvent::Message(text)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                        None => requested_close.take().map_or((None, String::new()), |(code, reason)| (Some(code), reason)),
                    };
                    let _ = events.send(TransportEvent::Closed { code, reason });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    let err = TransportError::Stream(err.to_string());
                    warn!(target: "beach_tide::transport", connection = id, error = %err, "websocket read failed");
                    let _ = events.send(TransportEvent::Error(err.to_string()));
                    let _ = events.send(TransportEvent::Closed { code: None, reason: "stream error".into() });
                    return;
                }
                None => {
                    let (code, reason) = requested_close
                        .take()
                        .map_or((None, "stream ended".to_string()), |(code, reason)| (Some(code), reason));
                    let _ = events.send(TransportEvent::Closed { code, reason });
                    return;
                }
            },
            request = outbound.recv(), if outbound_open => match request {
                Some(Outbound::Text(text)) => {
                    if let Err(err) = sink.send(Message::Text(text)).await {
                        let _ = events.send(TransportEvent::Error(err.to_string()));
                        let _ = events.send(TransportEvent::Closed { code: None, reason: "send failed".into() });
                        return;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    debug!(target: "beach_tide::transport", connection = id, code, %reason, "closing websocket");
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    requested_close = Some((code, reason));
                    if sink.send(Message::Close(Some(frame))).await.is_err() {
                        let (code, reason) = requested_close.take().map_or((None, String::new()), |(code, reason)| (Some(code), reason));
                        let _ = events.send(TransportEvent::Closed { code, reason });
                        return;
                    }
                }
                None => {
                    outbound_open = false;
                    let _ = sink.send(Message::Close(None)).await;
                }
            },
        }
    }

    let _ = sink.send(Message::Close(None)).await;
}
