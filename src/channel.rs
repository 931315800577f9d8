//! Channels: the message stream the simulation and battle modes read from.
//!
//! ## Design
//! - A [`Connector`] opens a [`Channel`] for a [`ChannelId`] minted by the
//!   session controller.
//! - Everything a channel observes is posted to one [`SessionEvent`] queue,
//!   tagged with the channel id. The controller drains that queue, so all
//!   transcript mutation happens on one task, in arrival order.
//! - `close()` is the only cancellation. A closed channel posts nothing
//!   further, and the controller also drops events whose id is not the
//!   active one.

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

use crate::error::ChatError;
use crate::protocol::AnalysisResponse;

/// Identity of one opened channel. Never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Something a channel observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Connection established; queued sends have been flushed.
    Opened,
    /// One inbound payload, undecoded.
    Message(String),
    Error(String),
    /// The remote side ended the stream.
    Closed,
}

/// Inbound work for the session controller.
#[derive(Debug)]
pub enum SessionEvent {
    Channel {
        channel: ChannelId,
        event: ChannelEvent,
    },
    /// Outcome of the analysis request whose placeholder is `response_id`.
    Analysis {
        response_id: String,
        result: Result<AnalysisResponse, ChatError>,
    },
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

pub fn event_queue() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// An open message stream.
pub trait Channel: Send {
    fn id(&self) -> ChannelId;

    /// Queue `text` for sending. Text sent before the connection is up goes
    /// out first once it is.
    fn send(&mut self, text: String) -> Result<(), ChatError>;

    /// Close the stream. Idempotent; no events follow.
    fn close(&mut self);
}

/// Opens channels.
pub trait Connector {
    fn open(&mut self, id: ChannelId, url: &str) -> Result<Box<dyn Channel>, ChatError>;
}

/// `base` with `params` appended as a URL-encoded query string.
pub fn with_query(base: &str, params: &[(&str, &str)]) -> Result<String, ChatError> {
    Url::parse_with_params(base, params)
        .map(String::from)
        .map_err(|e| ChatError::Config(format!("invalid endpoint '{base}': {e}")))
}

// ---------------------------------------------------------------------------
// WebSocket transport
// ---------------------------------------------------------------------------

/// Opens tokio-tungstenite WebSocket channels feeding `events`.
pub struct WsConnector {
    events: EventSender,
}

impl WsConnector {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }
}

impl Connector for WsConnector {
    fn open(&mut self, id: ChannelId, url: &str) -> Result<Box<dyn Channel>, ChatError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ChatError::Runtime(e.to_string()))?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        runtime.spawn(run_socket(
            id,
            url.to_string(),
            outbound_rx,
            close_rx,
            self.events.clone(),
        ));
        debug!(channel = %id, url, "channel opening");
        Ok(Box::new(WsChannel {
            id,
            url: url.to_string(),
            outbound: outbound_tx,
            close_tx: Some(close_tx),
        }))
    }
}

/// Handle to a socket task spawned by [`WsConnector`].
pub struct WsChannel {
    id: ChannelId,
    url: String,
    outbound: mpsc::UnboundedSender<String>,
    close_tx: Option<oneshot::Sender<()>>,
}

impl Channel for WsChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn send(&mut self, text: String) -> Result<(), ChatError> {
        if self.close_tx.is_none() {
            return Err(ChatError::transport(&self.url, "channel already closed"));
        }
        self.outbound
            .send(text)
            .map_err(|_| ChatError::transport(&self.url, "socket task has exited"))
    }

    fn close(&mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
            debug!(channel = %self.id, "channel closed locally");
        }
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Socket task. Exits without posting anything once `close_rx` fires (or its
/// sender is dropped).
async fn run_socket(
    id: ChannelId,
    url: String,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut close_rx: oneshot::Receiver<()>,
    events: EventSender,
) {
    let emit = |event: ChannelEvent| {
        let _ = events.send(SessionEvent::Channel { channel: id, event });
    };

    let connected = tokio::select! {
        _ = &mut close_rx => return,
        result = tokio_tungstenite::connect_async(url.as_str()) => result,
    };
    let (ws, _response) = match connected {
        Ok(pair) => pair,
        Err(e) => {
            warn!(channel = %id, url = %url, error = %e, "connect failed");
            emit(ChannelEvent::Error(e.to_string()));
            return;
        }
    };
    let (mut sink, mut stream) = ws.split();

    // Flush anything queued while connecting (the handshake) before reporting open.
    while let Ok(text) = outbound.try_recv() {
        if let Err(e) = sink.send(WsMessage::Text(text)).await {
            emit(ChannelEvent::Error(e.to_string()));
            return;
        }
    }
    emit(ChannelEvent::Opened);

    loop {
        tokio::select! {
            _ = &mut close_rx => {
                let _ = sink.send(WsMessage::Close(None)).await;
                return;
            }
            Some(text) = outbound.recv() => {
                if let Err(e) = sink.send(WsMessage::Text(text)).await {
                    emit(ChannelEvent::Error(e.to_string()));
                    return;
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => emit(ChannelEvent::Message(text)),
                Some(Ok(WsMessage::Binary(bytes))) => {
                    emit(ChannelEvent::Message(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    emit(ChannelEvent::Closed);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    emit(ChannelEvent::Error(e.to_string()));
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_id_display() {
        assert_eq!(ChannelId(7).to_string(), "ch-7");
    }

    #[test]
    fn test_with_query_encodes_arabic_and_spaces() {
        let url = with_query("ws://localhost:8000/wss/generate", &[("prompt", "بيت شعر")]).expect("url");
        assert!(url.starts_with("ws://localhost:8000/wss/generate?prompt="));
        assert!(!url.contains(' '));
        let parsed = Url::parse(&url).expect("reparse");
        let (_, value) = parsed.query_pairs().next().expect("pair");
        assert_eq!(value, "بيت شعر");
    }

    #[test]
    fn test_with_query_rejects_bad_base() {
        assert!(matches!(with_query("not a url", &[("a", "b")]), Err(ChatError::Config(_))));
    }

    #[test]
    fn test_open_outside_runtime_is_error() {
        let (tx, _rx) = event_queue();
        let mut connector = WsConnector::new(tx);
        let err = connector.open(ChannelId(1), "ws://127.0.0.1:9/").err().expect("no runtime");
        assert!(matches!(err, ChatError::Runtime(_)));
    }

    #[tokio::test]
    async fn test_connect_failure_posts_error_event() {
        let (tx, mut rx) = event_queue();
        let mut connector = WsConnector::new(tx);
        // Port 9 (discard) is essentially never listening on loopback.
        let _ch = connector.open(ChannelId(3), "ws://127.0.0.1:9/").expect("spawned");
        match rx.recv().await {
            Some(SessionEvent::Channel { channel, event: ChannelEvent::Error(_) }) => {
                assert_eq!(channel, ChannelId(3));
            }
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closed_before_connect_posts_nothing() {
        let (tx, mut rx) = event_queue();
        let mut connector = WsConnector::new(tx);
        let mut ch = connector.open(ChannelId(4), "ws://127.0.0.1:9/").expect("spawned");
        ch.close();
        assert!(ch.send("late".into()).is_err());
        drop(ch);
        drop(connector);
        // The only sender left is inside the (now finished or finishing) task.
        let next = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv()).await;
        match next {
            Ok(None) | Err(_) => {}
            Ok(Some(SessionEvent::Channel { event: ChannelEvent::Error(_), .. })) => {
                // connect may have failed before the close signal was observed
            }
            Ok(Some(other)) => panic!("unexpected event after close: {other:?}"),
        }
    }
}
