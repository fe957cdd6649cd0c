use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

use mattersync_engine::{Chunk, HttpRequest, HttpTransport, Method, RequestError, RequestId};

/// One piece of a response, in the order the engine expects it.
pub type ResponseChunk = (RequestId, Chunk, bool);

/// Runs each dispatched request on its own task and streams the response
/// back as chunks.
pub struct ReqwestTransport {
    client: Client,
    tx: UnboundedSender<ResponseChunk>,
}

impl ReqwestTransport {
    pub fn new(client: Client, tx: UnboundedSender<ResponseChunk>) -> Self {
        Self { client, tx }
    }
}

impl HttpTransport for ReqwestTransport {
    fn dispatch(&mut self, id: RequestId, request: &HttpRequest) {
        let builder = build(&self.client, request);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => {
                    let _ = tx.send((id, Chunk::Failed(RequestError::Transport(e.to_string())), true));
                    return;
                }
            };

            let status = response.status().as_u16();
            let token = response
                .headers()
                .get("Token")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            if tx.send((id, Chunk::Head { status, token }, false)).is_err() {
                return;
            }

            let mut body = response.bytes_stream();
            while let Some(result) = body.next().await {
                let chunk = match result {
                    Ok(data) => Chunk::Body(data),
                    Err(e) => {
                        let _ = tx.send((id, Chunk::Failed(RequestError::Transport(e.to_string())), true));
                        return;
                    }
                };
                if tx.send((id, chunk, false)).is_err() {
                    return;
                }
            }
            trace!("Response {} complete", id);
            let _ = tx.send((id, Chunk::Body(Bytes::new()), true));
        });
    }
}

fn build(client: &Client, request: &HttpRequest) -> reqwest::RequestBuilder {
    let mut builder = match request.method {
        Method::Get => client.get(&request.url),
        Method::Post => client.post(&request.url),
        Method::Delete => client.delete(&request.url),
    };
    if let Some(token) = &request.bearer {
        builder = builder.bearer_auth(token);
    }
    if let Some(body) = &request.body {
        builder = builder
            .header("Content-Type", "application/json")
            .body(body.clone());
    }
    builder
}

/// Performs a request outside the queue and waits for it. Used for logout.
pub async fn execute(client: &Client, request: &HttpRequest, timeout: Duration) -> Result<(), RequestError> {
    let response = build(client, request)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                RequestError::Timeout(timeout)
            } else {
                RequestError::Transport(e.to_string())
            }
        })?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(RequestError::Status {
        status: status.as_u16(),
        body,
    })
}
