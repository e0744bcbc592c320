//! Channels to the tracing backend.
//!
//! The push channel ([`ws`]) carries live frames and outbound commands and
//! reconnects on its own. The request/response channel ([`http`]) serves full
//! resyncs and run restarts.

pub mod error;
pub mod http;
pub mod ws;

pub use error::TransportError;
pub use http::{Backend, HttpBackend};
pub use ws::{connect, ConnectionState, PushChannel, ReconnectPolicy, TransportEvent};
