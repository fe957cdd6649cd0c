pub mod actions;
pub mod config;
pub mod endpoints;
pub mod engine;
pub mod error;
pub mod graph;
pub mod hydration;
pub mod queue;
pub mod reconciler;
pub mod registry;
pub mod session;
pub mod transport;
pub mod view;
pub mod worker;

pub use config::{EngineSettings, ReconnectPolicy, ServerConfig, Settings};
pub use engine::Engine;
pub use error::{RequestError, StreamError, SyncError};
pub use transport::{Chunk, HttpRequest, HttpResponse, HttpTransport, Method, RequestId};
pub use view::ViewSink;
pub use worker::{ConnectionState, Frame, StreamConnector, StreamLink, WorkerId};
