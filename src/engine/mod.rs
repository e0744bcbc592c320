//! Single-owner reducer over transport events and operator commands.
//!
//! The engine performs no I/O. Every entry point mutates local state and
//! returns the [`Effect`]s the host must carry out.

mod control;
mod effect;

use std::time::{Duration, Instant};

pub use control::{ContinueGate, DEFAULT_CONTINUE_TIMEOUT};
pub use effect::Effect;

use crate::config::Config;
use crate::protocol::{decode, ClientMessage, ExecutionStep, SequenceId, ServerMessage, SyncPayload};
use crate::stream::StreamMultiplexer;
use crate::timeline::{
    annotate_frame, apply_frames, apply_highlight, Correlator, NodeRef, ReturnPolicy, Scope,
    TimelineStore, UpsertOutcome,
};
use crate::transport::{ConnectionState, TransportEvent};

/// Tunables the engine is built with.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub timeline_capacity: usize,
    pub return_policy: ReturnPolicy,
    pub stream_capacity: usize,
    pub continue_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            timeline_capacity: config.timeline.capacity,
            return_policy: config.timeline.return_policy,
            stream_capacity: config.streams.capacity,
            continue_timeout: config.control.continue_timeout,
        }
    }
}

pub struct Engine {
    store: TimelineStore,
    streams: StreamMultiplexer,
    nodes: Vec<NodeRef>,
    highlighted_line: Option<u32>,
    connection: ConnectionState,
    /// Generation of the live connection; frames and syncs from others are stale
    generation: Option<u64>,
    gate: ContinueGate,
    /// Bumped whenever the timeline is replaced or cleared wholesale
    epoch: u64,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

impl Engine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            store: TimelineStore::new(settings.timeline_capacity, settings.return_policy),
            streams: StreamMultiplexer::new(settings.stream_capacity),
            nodes: Vec::new(),
            highlighted_line: None,
            connection: ConnectionState::Connecting,
            generation: None,
            gate: ContinueGate::new(settings.continue_timeout),
            epoch: 0,
        }
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    pub fn handle_transport(&mut self, event: TransportEvent) -> Vec<Effect> {
        match event {
            TransportEvent::Connected { generation } => {
                if self.generation.is_some_and(|current| generation < current) {
                    tracing::debug!(generation, "Ignoring connect from an older generation");
                    return Vec::new();
                }
                self.generation = Some(generation);
                self.connection = ConnectionState::Connected { generation };
                vec![Effect::FetchSync { generation }]
            }
            TransportEvent::Disconnected { generation, reason } => {
                if self.generation == Some(generation) {
                    tracing::info!(generation, reason = %reason, "Backend disconnected");
                    self.connection = ConnectionState::Disconnected;
                }
                Vec::new()
            }
            TransportEvent::Frame { generation, text } => {
                if self.generation != Some(generation) {
                    tracing::debug!(generation, "Discarding frame from a stale connection");
                    return Vec::new();
                }
                self.handle_frame(&text)
            }
        }
    }

    /// Decode and apply one raw frame. Malformed frames are logged and dropped.
    pub fn handle_frame(&mut self, text: &str) -> Vec<Effect> {
        // Any backend activity means the program moved on
        self.gate.release();

        if text.trim().is_empty() {
            tracing::trace!("Ignoring empty frame");
            return Vec::new();
        }

        match decode(text) {
            Ok(message) => self.apply(message),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed frame");
                Vec::new()
            }
        }
    }

    pub fn apply(&mut self, message: ServerMessage) -> Vec<Effect> {
        match message {
            ServerMessage::Event(step) => self.apply_step(step),
            ServerMessage::Sync(payload) => self.apply_sync(payload),
            ServerMessage::Chunk { stream, text } => {
                self.streams.push(stream, &text);
                Vec::new()
            }
            ServerMessage::Flush(stream) => {
                if self.streams.flush(stream).is_none() {
                    tracing::debug!(stream = %stream, "Flush with no open entry");
                }
                Vec::new()
            }
        }
    }

    fn apply_step(&mut self, step: ExecutionStep) -> Vec<Effect> {
        let id = step.sequence_id;
        let line = step.source_line;
        let frame_id = step.frame_id.clone();

        let outcome = self.store.upsert(step);
        if outcome == UpsertOutcome::Stale {
            return Vec::new();
        }
        let moved = self.store.advance_live(id);

        // Annotations reflect the latest step per line at or before the cursor
        let covered = self.store.cursor().is_some_and(|cursor| id <= cursor);
        match (outcome, line) {
            (UpsertOutcome::Appended, Some(line)) if covered => {
                annotate_frame(&mut self.nodes, line, frame_id.as_deref());
            }
            (UpsertOutcome::Inserted | UpsertOutcome::Replaced, _) if covered => {
                self.refresh_frames();
            }
            _ => {}
        }
        if moved {
            self.set_highlight(line);
        }
        Vec::new()
    }

    fn apply_sync(&mut self, payload: SyncPayload) -> Vec<Effect> {
        let cursor = payload.cursor();
        let node_line = payload
            .node_id
            .as_deref()
            .and_then(|id| id.trim().parse::<u32>().ok());

        self.nodes = payload.nodes.into_iter().map(NodeRef::from).collect();
        self.store.replace_all(payload.timeline, cursor);
        self.epoch += 1;

        let line = node_line.or_else(|| cursor.and_then(|id| self.store.line_of(id)));
        self.highlighted_line = None;
        self.set_highlight(line);
        tracing::debug!(
            steps = self.store.len(),
            nodes = self.nodes.len(),
            cursor = ?cursor,
            "Applied full sync"
        );
        Vec::new()
    }

    /// Apply a sync fetched over the request/response channel.
    pub fn apply_sync_response(&mut self, generation: u64, payload: SyncPayload) -> Vec<Effect> {
        if self.generation != Some(generation) {
            tracing::debug!(generation, "Discarding sync response from a stale connection");
            return Vec::new();
        }
        self.apply_sync(payload)
    }

    // ------------------------------------------------------------------
    // Operator commands
    // ------------------------------------------------------------------

    /// Jump to the latest execution of a source line. The backend decides the
    /// new position; the local cursor is left alone until it answers.
    pub fn select_node(&mut self, line: u32) -> Vec<Effect> {
        match Correlator::new(&self.store).line_to_latest_step(line) {
            Some(id) => vec![Effect::Send(ClientMessage::NewTimelineId {
                new_timeline_id: id,
            })],
            None => {
                tracing::debug!(line, "No recorded step for line");
                Vec::new()
            }
        }
    }

    /// Pin the cursor to a recorded step and ask the backend to move there.
    pub fn select_step(&mut self, id: SequenceId) -> Vec<Effect> {
        if !self.store.pin(id) {
            tracing::debug!(sequence_id = id, "Ignoring selection of unknown step");
            return Vec::new();
        }
        self.refresh_annotations();
        vec![Effect::Send(ClientMessage::NewTimelineId {
            new_timeline_id: id,
        })]
    }

    /// Resume live-follow at the newest step.
    pub fn follow_live(&mut self) -> Vec<Effect> {
        self.store.follow_live();
        self.refresh_annotations();
        Vec::new()
    }

    pub fn request_continue(&mut self, now: Instant) -> Vec<Effect> {
        if !self.gate.try_disable(now) {
            tracing::debug!("Continue already pending");
            return Vec::new();
        }
        vec![Effect::Send(ClientMessage::Continue)]
    }

    pub fn edit_node(&mut self, line: u32, code: impl Into<String>) -> Vec<Effect> {
        let code = code.into();
        if let Some(node) = self.nodes.iter_mut().find(|n| n.line == Some(line)) {
            node.source_segment = code.clone();
        }
        vec![Effect::Send(ClientMessage::UpdateNodeCode {
            lineno: line,
            code_segment: code,
        })]
    }

    pub fn clear_output(&mut self) {
        self.streams.clear();
    }

    pub fn restart_backend(&mut self) -> Vec<Effect> {
        vec![Effect::StartBackend]
    }

    /// A new run started: drop the old history and resync.
    pub fn backend_restarted(&mut self) -> Vec<Effect> {
        self.store.clear();
        self.epoch += 1;
        self.highlighted_line = None;
        apply_highlight(&mut self.nodes, None);
        for node in &mut self.nodes {
            node.frame_id = None;
        }
        match self.generation {
            Some(generation) if matches!(self.connection, ConnectionState::Connected { .. }) => {
                vec![Effect::FetchSync { generation }]
            }
            _ => Vec::new(),
        }
    }

    fn refresh_annotations(&mut self) {
        let line = self
            .store
            .cursor()
            .and_then(|id| Correlator::new(&self.store).step_to_line(id));
        self.refresh_frames();
        self.set_highlight(line);
    }

    fn refresh_frames(&mut self) {
        let frames = Correlator::new(&self.store).frame_annotations(self.store.cursor());
        apply_frames(&mut self.nodes, &frames);
    }

    fn set_highlight(&mut self, line: Option<u32>) {
        apply_highlight(&mut self.nodes, line);
        self.highlighted_line = line;
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    pub fn timeline(&self) -> &TimelineStore {
        &self.store
    }

    pub fn scope(&self) -> Option<Scope> {
        self.store.current_scope()
    }

    pub fn cursor(&self) -> Option<SequenceId> {
        self.store.cursor()
    }

    pub fn streams(&self) -> &StreamMultiplexer {
        &self.streams
    }

    pub fn nodes(&self) -> &[NodeRef] {
        &self.nodes
    }

    pub fn highlighted_line(&self) -> Option<u32> {
        self.highlighted_line
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn generation(&self) -> Option<u64> {
        self.generation
    }

    pub fn continue_enabled(&self, now: Instant) -> bool {
        self.gate.is_enabled(now)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}
