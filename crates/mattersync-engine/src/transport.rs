use std::fmt;

use bytes::Bytes;

use crate::error::RequestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        })
    }
}

/// One outbound REST call, already resolved against the server base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub bearer: Option<String>,
    /// JSON body.
    pub body: Option<String>,
}

impl HttpRequest {
    /// Path and query relative to `/api/v4`, for logs and tests.
    pub fn path(&self) -> &str {
        self.url
            .find("/api/v4")
            .map(|i| &self.url[i + "/api/v4".len()..])
            .unwrap_or(&self.url)
    }
}

/// A fully buffered 2xx response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Value of the `Token` header, only set by login.
    pub token: Option<String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, RequestError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A piece of a response as delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    /// Status line and the headers the engine cares about. Always first.
    Head { status: u16, token: Option<String> },
    Body(Bytes),
    /// The request could not complete. Terminal.
    Failed(RequestError),
}

/// Fire-and-forget HTTP client.
///
/// `dispatch` must not block. The transport later reports the outcome by
/// feeding chunks for `id` back into the engine.
pub trait HttpTransport {
    fn dispatch(&mut self, id: RequestId, request: &HttpRequest);
}
