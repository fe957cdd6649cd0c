use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use mattersync_engine::{Frame, StreamConnector, StreamError, StreamLink, WorkerId};

/// Tells the runtime that a worker has frames waiting.
pub type Readiness = (String, WorkerId);

/// Opens WebSocket connections on background tasks.
pub struct TungsteniteConnector {
    ready: UnboundedSender<Readiness>,
}

impl TungsteniteConnector {
    pub fn new(ready: UnboundedSender<Readiness>) -> Self {
        Self { ready }
    }
}

impl StreamConnector for TungsteniteConnector {
    fn open(&mut self, server_id: &str, worker_id: WorkerId, url: &str) -> Result<Box<dyn StreamLink>, StreamError> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(
            url.to_string(),
            (server_id.to_string(), worker_id),
            out_rx,
            in_tx,
            self.ready.clone(),
        ));
        Ok(Box::new(TungsteniteLink {
            outbound: out_tx,
            inbound: in_rx,
        }))
    }
}

/// Engine side of a connection: outbound messages go to the pump task,
/// inbound frames are buffered until the engine drains them.
struct TungsteniteLink {
    outbound: UnboundedSender<Message>,
    inbound: UnboundedReceiver<Frame>,
}

impl TungsteniteLink {
    fn send(&mut self, message: Message) -> Result<(), StreamError> {
        self.outbound
            .send(message)
            .map_err(|_| StreamError::ConnectionLost("stream task ended".into()))
    }
}

impl StreamLink for TungsteniteLink {
    fn send_text(&mut self, text: String) -> Result<(), StreamError> {
        self.send(Message::Text(text.into()))
    }

    fn send_ping(&mut self) -> Result<(), StreamError> {
        self.send(Message::Ping(Default::default()))
    }

    fn try_recv(&mut self) -> Result<Option<Frame>, StreamError> {
        match self.inbound.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(StreamError::ConnectionLost("stream task ended".into())),
        }
    }

    fn close(&mut self) {
        let _ = self.outbound.send(Message::Close(None));
    }
}

/// Owns the socket: connects, then shuttles messages both ways until either
/// side goes away.
async fn pump(
    url: String,
    readiness: Readiness,
    mut outbound: UnboundedReceiver<Message>,
    inbound: UnboundedSender<Frame>,
    ready: UnboundedSender<Readiness>,
) {
    let deliver = |frame: Frame| {
        let delivered = inbound.send(frame).is_ok();
        let _ = ready.send(readiness.clone());
        delivered
    };

    let ws_stream = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            warn!("WS connect to {} failed: {}", url, e);
            deliver(Frame::Closed(Some(e.to_string())));
            return;
        }
    };
    debug!("Stream {} connected", readiness.1);
    if !deliver(Frame::Opened) {
        return;
    }

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    // Link dropped by the engine.
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                };
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = ws_tx.send(message).await {
                    deliver(Frame::Closed(Some(e.to_string())));
                    break;
                }
                if closing {
                    break;
                }
            }
            incoming = ws_rx.next() => {
                let frame = match incoming {
                    Some(Ok(Message::Text(text))) => Frame::Text(text.as_str().to_string()),
                    Some(Ok(Message::Pong(_))) => Frame::Pong,
                    Some(Ok(Message::Close(reason))) => {
                        Frame::Closed(reason.map(|r| r.reason.as_str().to_string()))
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => Frame::Closed(Some(e.to_string())),
                    None => Frame::Closed(None),
                };
                let closed = matches!(frame, Frame::Closed(_));
                if !deliver(frame) || closed {
                    break;
                }
            }
        }
    }
    trace!("Stream {} pump finished", readiness.1);
}
