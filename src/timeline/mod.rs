//! Ordered execution history and the state derived from it.
//!
//! [`TimelineStore`] is the authoritative history keyed by sequence id.
//! [`Scope`] is never stored: it is folded from the store's steps on demand.

pub mod navigation;
pub mod scope;
pub mod store;

pub use navigation::{annotate_frame, apply_frames, apply_highlight, Correlator, NodeRef};
pub use scope::{derive_scope, derive_scope_from, ReturnPolicy, Scope};
pub use store::{FollowMode, TimelineStore, UpsertOutcome, DEFAULT_CAPACITY};
