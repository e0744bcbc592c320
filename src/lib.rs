pub mod app;
pub mod config;
pub mod engine;
pub mod protocol;
pub mod stream;
pub mod timeline;
pub mod transport;
pub mod util;

pub use app::{App, AppEvent, Command, TerminalView};
pub use config::Config;
pub use engine::{Effect, Engine, EngineSettings};
pub use protocol::{ClientMessage, ExecutionStep, SequenceId, ServerMessage, SyncPayload};
pub use stream::{StreamEntry, StreamMultiplexer};
pub use timeline::{derive_scope, NodeRef, ReturnPolicy, Scope, TimelineStore};
pub use transport::{Backend, HttpBackend, PushChannel, ReconnectPolicy, TransportError};
