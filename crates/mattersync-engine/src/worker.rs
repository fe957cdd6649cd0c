use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};
use uuid::Uuid;

use mattersync_types::events::{AuthenticationChallenge, Envelope, StreamEvent};

use crate::error::{StreamError, SyncError};

/// Lifecycle of a server's event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
        })
    }
}

/// Identifies one stream connection. Frames tagged with a retired id are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// The handshake completed.
    Opened,
    Text(String),
    Pong,
    Closed(Option<String>),
}

/// Non-blocking handle on one WebSocket connection.
pub trait StreamLink {
    fn send_text(&mut self, text: String) -> Result<(), StreamError>;

    fn send_ping(&mut self) -> Result<(), StreamError>;

    /// Next buffered frame, `Ok(None)` when nothing is available right now.
    fn try_recv(&mut self) -> Result<Option<Frame>, StreamError>;

    fn close(&mut self);
}

/// Starts stream connections. Readiness of the returned link is reported to
/// the engine through `on_readable` with the same worker id.
pub trait StreamConnector {
    fn open(&mut self, server_id: &str, worker_id: WorkerId, url: &str) -> Result<Box<dyn StreamLink>, StreamError>;
}

/// `https://host/path` → `wss://host/path/api/v4/websocket`.
pub fn stream_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/api/v4/websocket", ws)
}

/// What a receive pass produced.
#[derive(Debug)]
pub enum Received {
    Opened,
    Event(StreamEvent),
    /// The link is gone. Always the last item.
    Lost(StreamError),
}

pub struct Worker {
    pub id: WorkerId,
    link: Box<dyn StreamLink>,
    opened: bool,
    interval: Duration,
    next_heartbeat: Instant,
    last_ping: Option<Instant>,
    last_pong: Option<Instant>,
    seq: u64,
}

impl Worker {
    /// Connects and queues the authentication challenge.
    pub fn open(
        connector: &mut dyn StreamConnector,
        server_id: &str,
        base_url: &str,
        token: &str,
        now: Instant,
        interval: Duration,
    ) -> Result<Self, StreamError> {
        let id = WorkerId::new();
        let url = stream_url(base_url);
        debug!("Opening stream {} for {} at {}", id, server_id, url);
        let link = connector.open(server_id, id, &url)?;

        let mut worker = Self {
            id,
            link,
            opened: false,
            interval,
            next_heartbeat: now + interval,
            last_ping: None,
            last_pong: None,
            seq: 0,
        };
        worker.seq += 1;
        let challenge = AuthenticationChallenge::new(worker.seq, token);
        let text = serde_json::to_string(&challenge)
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        worker.link.send_text(text)?;
        Ok(worker)
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }

    /// Drains every frame currently available on the link.
    ///
    /// Malformed frames are logged and skipped. Events decoded before a
    /// link failure are still returned ahead of the `Lost` item.
    pub fn receive(&mut self, now: Instant) -> Vec<Received> {
        let mut out = Vec::new();
        loop {
            let frame = match self.link.try_recv() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    out.push(Received::Lost(e));
                    break;
                }
            };
            match frame {
                Frame::Opened => {
                    self.opened = true;
                    out.push(Received::Opened);
                }
                Frame::Pong => {
                    trace!("Pong on {}", self.id);
                    self.last_pong = Some(now);
                }
                Frame::Text(text) => match decode(&text) {
                    Ok(Some(event)) => out.push(Received::Event(event)),
                    Ok(None) => {}
                    Err(e) => warn!("Ignoring frame on {}: {}", self.id, SyncError::Protocol(e.to_string())),
                },
                Frame::Closed(reason) => {
                    let reason = reason.unwrap_or_else(|| "closed by peer".into());
                    out.push(Received::Lost(StreamError::ConnectionLost(reason)));
                    break;
                }
            }
        }
        out
    }

    /// Pings when due. Fails if the previous ping was never answered.
    pub fn heartbeat(&mut self, now: Instant) -> Result<(), StreamError> {
        if now < self.next_heartbeat {
            return Ok(());
        }
        self.next_heartbeat = now + self.interval;

        if let Some(ping) = self.last_ping {
            if self.last_pong.is_none_or(|pong| pong < ping) {
                return Err(StreamError::HeartbeatTimeout);
            }
        }
        self.link.send_ping()?;
        self.last_ping = Some(now);
        Ok(())
    }

    pub fn close(&mut self) {
        debug!("Closing stream {}", self.id);
        self.link.close();
    }
}

fn decode(text: &str) -> Result<Option<StreamEvent>, serde_json::Error> {
    serde_json::from_str::<Envelope>(text)?.into_event()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::*;

    #[derive(Default)]
    struct Wire {
        sent: Vec<String>,
        pings: usize,
        inbox: VecDeque<Frame>,
        closed: bool,
    }

    struct FakeLink(Rc<RefCell<Wire>>);

    impl StreamLink for FakeLink {
        fn send_text(&mut self, text: String) -> Result<(), StreamError> {
            self.0.borrow_mut().sent.push(text);
            Ok(())
        }

        fn send_ping(&mut self) -> Result<(), StreamError> {
            self.0.borrow_mut().pings += 1;
            Ok(())
        }

        fn try_recv(&mut self) -> Result<Option<Frame>, StreamError> {
            Ok(self.0.borrow_mut().inbox.pop_front())
        }

        fn close(&mut self) {
            self.0.borrow_mut().closed = true;
        }
    }

    struct FakeConnector(Rc<RefCell<Wire>>);

    impl StreamConnector for FakeConnector {
        fn open(&mut self, _: &str, _: WorkerId, url: &str) -> Result<Box<dyn StreamLink>, StreamError> {
            assert_eq!(url, "wss://chat.example.com/api/v4/websocket");
            Ok(Box::new(FakeLink(self.0.clone())))
        }
    }

    fn open(wire: &Rc<RefCell<Wire>>, now: Instant) -> Worker {
        let mut connector = FakeConnector(wire.clone());
        Worker::open(&mut connector, "s", "https://chat.example.com/", "tok", now, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn url_scheme_is_rewritten() {
        assert_eq!(stream_url("http://localhost:8065"), "ws://localhost:8065/api/v4/websocket");
        assert_eq!(stream_url("https://h/mm/"), "wss://h/mm/api/v4/websocket");
    }

    #[test]
    fn first_frame_is_the_challenge() {
        let wire = Rc::new(RefCell::new(Wire::default()));
        open(&wire, Instant::now());
        let sent: serde_json::Value = serde_json::from_str(&wire.borrow().sent[0]).unwrap();
        assert_eq!(sent["action"], "authentication_challenge");
        assert_eq!(sent["data"]["token"], "tok");
    }

    #[test]
    fn missing_pong_is_a_timeout() {
        let wire = Rc::new(RefCell::new(Wire::default()));
        let start = Instant::now();
        let mut worker = open(&wire, start);

        worker.heartbeat(start + Duration::from_secs(1)).unwrap();
        assert_eq!(wire.borrow().pings, 0);
        worker.heartbeat(start + Duration::from_secs(5)).unwrap();
        assert_eq!(wire.borrow().pings, 1);

        wire.borrow_mut().inbox.push_back(Frame::Pong);
        worker.receive(start + Duration::from_secs(6));
        worker.heartbeat(start + Duration::from_secs(10)).unwrap();
        assert_eq!(wire.borrow().pings, 2);

        assert_eq!(
            worker.heartbeat(start + Duration::from_secs(15)),
            Err(StreamError::HeartbeatTimeout)
        );
    }

    #[test]
    fn receive_skips_garbage_and_reports_close() {
        let wire = Rc::new(RefCell::new(Wire::default()));
        let now = Instant::now();
        let mut worker = open(&wire, now);
        {
            let mut w = wire.borrow_mut();
            w.inbox.push_back(Frame::Opened);
            w.inbox.push_back(Frame::Text("{not json".into()));
            w.inbox.push_back(Frame::Text(r#"{"event":"hello","data":{},"broadcast":{}}"#.into()));
        }
        let received = worker.receive(now);
        assert_eq!(received.len(), 2);
        assert!(worker.is_opened());

        {
            let mut w = wire.borrow_mut();
            w.inbox.push_back(Frame::Text(r#"{"event":"hello","data":{},"broadcast":{}}"#.into()));
            w.inbox.push_back(Frame::Closed(None));
        }
        let received = worker.receive(now);
        assert!(matches!(received[0], Received::Event(StreamEvent::Hello)));
        assert!(matches!(received[1], Received::Lost(StreamError::ConnectionLost(_))));
    }
}
