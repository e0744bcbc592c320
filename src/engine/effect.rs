use crate::protocol::ClientMessage;

/// Side effects that should be executed outside the reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Write a message to the push channel
    Send(ClientMessage),
    /// Fetch a full resync, tagged with the connection it was requested for
    FetchSync { generation: u64 },
    /// Ask the backend to (re)start the traced program
    StartBackend,
}
