//! Wire protocol shared with the tracing backend.
//!
//! Inbound frames are JSON envelopes discriminated by `type`; see [`decode`].
//! Decoding never panics: a bad frame yields a [`DecodeError`] and the caller
//! moves on to the next one.

pub mod diff;
pub mod error;
pub mod messages;
pub mod step;

pub use diff::{Diff, DiffOp, DELETED_SENTINEL};
pub use error::DecodeError;
pub use messages::{
    decode, encode, ClientMessage, NodeData, NodeSnapshot, ServerMessage, StreamName, SyncPayload,
};
pub use step::{ExecutionStep, Reported, SequenceId, StepKind};
