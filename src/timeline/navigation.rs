//! Mapping between source lines (graph nodes) and timeline positions.

use std::collections::HashMap;

use crate::protocol::{NodeSnapshot, SequenceId};

use super::store::TimelineStore;

/// A source-line node with the annotations the engine maintains for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub id: String,
    /// Line number, when the node id is numeric
    pub line: Option<u32>,
    pub source_segment: String,
    pub highlighted: bool,
    /// Frame that most recently executed this line
    pub frame_id: Option<String>,
}

impl NodeRef {
    pub fn new(line: u32, source_segment: impl Into<String>) -> Self {
        Self {
            id: line.to_string(),
            line: Some(line),
            source_segment: source_segment.into(),
            highlighted: false,
            frame_id: None,
        }
    }
}

impl From<NodeSnapshot> for NodeRef {
    fn from(snapshot: NodeSnapshot) -> Self {
        let line = snapshot.id.trim().parse().ok();
        Self {
            id: snapshot.id,
            line,
            source_segment: snapshot.data.source_segment,
            highlighted: false,
            frame_id: snapshot.data.frame_pointer,
        }
    }
}

/// Read-only lookups over a [`TimelineStore`]'s line index.
pub struct Correlator<'a> {
    store: &'a TimelineStore,
}

impl<'a> Correlator<'a> {
    pub fn new(store: &'a TimelineStore) -> Self {
        Self { store }
    }

    pub fn line_to_latest_step(&self, line: u32) -> Option<SequenceId> {
        self.store.latest_on_line(line)
    }

    pub fn step_to_line(&self, id: SequenceId) -> Option<u32> {
        self.store.line_of(id)
    }

    /// Frame of the latest step per line, over steps at or before `upto`.
    pub fn frame_annotations(&self, upto: Option<SequenceId>) -> HashMap<u32, Option<String>> {
        let mut frames = HashMap::new();
        let Some(upto) = upto else {
            return frames;
        };
        for step in self.store.iter().take_while(|s| s.sequence_id <= upto) {
            if let Some(line) = step.source_line {
                frames.insert(line, step.frame_id.clone());
            }
        }
        frames
    }
}

/// Highlight the node for `line` and clear every other highlight.
///
/// Returns the number of nodes whose flag actually changed.
pub fn apply_highlight(nodes: &mut [NodeRef], line: Option<u32>) -> usize {
    let mut changed = 0;
    for node in nodes.iter_mut() {
        let want = line.is_some() && node.line == line;
        if node.highlighted != want {
            node.highlighted = want;
            changed += 1;
        }
    }
    changed
}

/// Rewrite frame annotations from a per-line map; lines missing from the map
/// are cleared.
pub fn apply_frames(nodes: &mut [NodeRef], frames: &HashMap<u32, Option<String>>) -> usize {
    let mut changed = 0;
    for node in nodes.iter_mut() {
        let want = node
            .line
            .and_then(|line| frames.get(&line).cloned())
            .flatten();
        if node.frame_id != want {
            node.frame_id = want;
            changed += 1;
        }
    }
    changed
}

/// Record that `line` is now executing in `frame_id`.
pub fn annotate_frame(nodes: &mut [NodeRef], line: u32, frame_id: Option<&str>) -> bool {
    let Some(node) = nodes.iter_mut().find(|n| n.line == Some(line)) else {
        return false;
    };
    if node.frame_id.as_deref() == frame_id {
        return false;
    }
    node.frame_id = frame_id.map(str::to_string);
    true
}
