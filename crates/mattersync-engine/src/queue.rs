use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::RequestError;
use crate::transport::{Chunk, HttpRequest, HttpResponse, HttpTransport, RequestId};

/// A queued REST call and the tag used to route its outcome.
#[derive(Debug)]
pub struct Job<C> {
    pub server_id: String,
    pub session: Uuid,
    pub request: HttpRequest,
    pub completion: C,
}

/// Outcome of a job, handed back to whoever owns the completion tag.
#[derive(Debug)]
pub struct Finished<C> {
    pub server_id: String,
    pub session: Uuid,
    pub completion: C,
    pub result: Result<HttpResponse, RequestError>,
}

struct InFlight<C> {
    id: RequestId,
    started: Instant,
    job: Job<C>,
    head: Option<(u16, Option<String>)>,
    body: BytesMut,
}

/// Single-flight FIFO of outbound HTTP jobs.
pub struct RequestQueue<C> {
    pending: VecDeque<Job<C>>,
    in_flight: Option<InFlight<C>>,
    next_id: u64,
    timeout: Duration,
}

impl<C> RequestQueue<C> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: None,
            next_id: 1,
            timeout,
        }
    }

    pub fn enqueue(&mut self, job: Job<C>) {
        trace!("Queued {} {} for {}", job.request.method, job.request.path(), job.server_id);
        self.pending.push_back(job);
    }

    /// Expires a stuck request, then issues the next job if the queue is idle.
    ///
    /// Returns the timed-out job, if any, so its completion can run.
    pub fn drain(&mut self, now: Instant, transport: &mut dyn HttpTransport) -> Option<Finished<C>> {
        let mut expired = None;
        if let Some(flight) = &self.in_flight {
            if now.saturating_duration_since(flight.started) >= self.timeout {
                if let Some(flight) = self.in_flight.take() {
                    warn!(
                        "Request {} {} {} timed out after {:?}",
                        flight.id,
                        flight.job.request.method,
                        flight.job.request.path(),
                        self.timeout
                    );
                    expired = Some(Self::finish(flight.job, Err(RequestError::Timeout(self.timeout))));
                }
            }
        }

        if self.in_flight.is_none() {
            if let Some(job) = self.pending.pop_front() {
                let id = RequestId(self.next_id);
                self.next_id += 1;
                debug!("Issuing {} {} {}", id, job.request.method, job.request.path());
                transport.dispatch(id, &job.request);
                self.in_flight = Some(InFlight {
                    id,
                    started: now,
                    job,
                    head: None,
                    body: BytesMut::new(),
                });
            }
        }

        expired
    }

    /// Accumulates one chunk of the in-flight response.
    ///
    /// Returns the completed job once `is_final` is seen or the transport
    /// reports a failure. Chunks for any other id are stale and dropped.
    pub fn buffered_response(&mut self, id: RequestId, chunk: Chunk, is_final: bool) -> Option<Finished<C>> {
        let Some(flight) = self.in_flight.as_mut().filter(|f| f.id == id) else {
            trace!("Discarding chunk for stale request {}", id);
            return None;
        };

        match chunk {
            Chunk::Head { status, token } => flight.head = Some((status, token)),
            Chunk::Body(bytes) => flight.body.extend_from_slice(&bytes),
            Chunk::Failed(error) => {
                let flight = self.in_flight.take()?;
                return Some(Self::finish(flight.job, Err(error)));
            }
        }

        if !is_final {
            return None;
        }

        let flight = self.in_flight.take()?;
        let body: Bytes = flight.body.freeze();
        let result = match flight.head {
            Some((status, token)) if (200..300).contains(&status) => Ok(HttpResponse { status, token, body }),
            Some((status, _)) => Err(RequestError::Status {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            }),
            None => Err(RequestError::Transport("response ended before its status line".into())),
        };
        Some(Self::finish(flight.job, result))
    }

    fn finish(job: Job<C>, result: Result<HttpResponse, RequestError>) -> Finished<C> {
        Finished {
            server_id: job.server_id,
            session: job.session,
            completion: job.completion,
            result,
        }
    }

    /// Drops pending jobs of a torn-down session. An issued request is left to
    /// complete; its result is routed to the stale session and ignored there.
    pub fn purge_session(&mut self, session: Uuid) -> usize {
        let before = self.pending.len();
        self.pending.retain(|job| job.session != session);
        before - self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len() + usize::from(self.in_flight.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }

    pub fn in_flight_id(&self) -> Option<RequestId> {
        self.in_flight.as_ref().map(|f| f.id)
    }
}
