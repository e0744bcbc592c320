use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::protocol::{ExecutionStep, SequenceId};

use super::scope::{ReturnPolicy, Scope};

/// Default number of retained steps
pub const DEFAULT_CAPACITY: usize = 500;

/// What an upsert did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New highest sequence id
    Appended,
    /// New id that arrived out of order
    Inserted,
    /// Existing id; replaced in place
    Replaced,
    /// Id at or below the eviction horizon; discarded
    Stale,
}

/// Whether the cursor tracks incoming steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FollowMode {
    #[default]
    Live,
    Pinned,
}

/// Bounded, sequence-ordered history of execution steps.
///
/// Steps are kept sorted by `sequence_id` regardless of arrival order. When the
/// store overflows, the oldest steps are evicted and folded into a baseline
/// scope so reconstruction at later positions remains exact.
#[derive(Debug, Clone)]
pub struct TimelineStore {
    steps: VecDeque<ExecutionStep>,
    capacity: usize,
    policy: ReturnPolicy,
    baseline: Option<Scope>,
    evicted_through: Option<SequenceId>,
    by_line: HashMap<u32, BTreeSet<SequenceId>>,
    cursor: Option<SequenceId>,
    follow: FollowMode,
}

impl Default for TimelineStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, ReturnPolicy::default())
    }
}

impl TimelineStore {
    pub fn new(capacity: usize, policy: ReturnPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            steps: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            policy,
            baseline: None,
            evicted_through: None,
            by_line: HashMap::new(),
            cursor: None,
            follow: FollowMode::Live,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> ReturnPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExecutionStep> {
        self.steps.iter()
    }

    pub fn get(&self, id: SequenceId) -> Option<&ExecutionStep> {
        self.position_of(id).map(|idx| &self.steps[idx])
    }

    pub fn contains(&self, id: SequenceId) -> bool {
        self.position_of(id).is_some()
    }

    /// Current index of a step; only valid until the next mutation.
    pub fn position_of(&self, id: SequenceId) -> Option<usize> {
        self.search(id).ok()
    }

    pub fn first_id(&self) -> Option<SequenceId> {
        self.steps.front().map(|s| s.sequence_id)
    }

    pub fn last_id(&self) -> Option<SequenceId> {
        self.steps.back().map(|s| s.sequence_id)
    }

    /// Highest sequence id folded into the baseline, if anything was evicted.
    pub fn evicted_through(&self) -> Option<SequenceId> {
        self.evicted_through
    }

    pub fn baseline(&self) -> Option<&Scope> {
        self.baseline.as_ref()
    }

    pub fn cursor(&self) -> Option<SequenceId> {
        self.cursor
    }

    pub fn follow_mode(&self) -> FollowMode {
        self.follow
    }

    pub fn is_following(&self) -> bool {
        self.follow == FollowMode::Live
    }

    fn search(&self, id: SequenceId) -> Result<usize, usize> {
        self.steps.binary_search_by_key(&id, |s| s.sequence_id)
    }

    /// Insert a step, or replace the one with the same sequence id.
    pub fn upsert(&mut self, step: ExecutionStep) -> UpsertOutcome {
        let id = step.sequence_id;
        if self.evicted_through.is_some_and(|horizon| id <= horizon) {
            tracing::debug!(sequence_id = id, "Discarding step older than retained history");
            return UpsertOutcome::Stale;
        }

        let outcome = match self.search(id) {
            Ok(idx) => {
                let previous_line = self.steps[idx].source_line;
                if previous_line != step.source_line {
                    self.unindex(previous_line, id);
                    self.index(step.source_line, id);
                }
                self.steps[idx] = step;
                UpsertOutcome::Replaced
            }
            Err(idx) => {
                self.index(step.source_line, id);
                if idx == self.steps.len() {
                    self.steps.push_back(step);
                    UpsertOutcome::Appended
                } else {
                    self.steps.insert(idx, step);
                    UpsertOutcome::Inserted
                }
            }
        };

        self.evict_overflow();
        outcome
    }

    fn evict_overflow(&mut self) {
        while self.steps.len() > self.capacity {
            let Some(oldest) = self.steps.pop_front() else {
                break;
            };
            self.unindex(oldest.source_line, oldest.sequence_id);
            self.baseline
                .get_or_insert_with(Scope::default)
                .apply(&oldest, self.policy);
            self.evicted_through = Some(oldest.sequence_id);
        }
    }

    fn index(&mut self, line: Option<u32>, id: SequenceId) {
        if let Some(line) = line {
            self.by_line.entry(line).or_default().insert(id);
        }
    }

    fn unindex(&mut self, line: Option<u32>, id: SequenceId) {
        if let Some(line) = line {
            if let Some(ids) = self.by_line.get_mut(&line) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.by_line.remove(&line);
                }
            }
        }
    }

    /// Swap in an authoritative history, resetting the baseline and resuming
    /// live-follow.
    pub fn replace_all(&mut self, steps: Vec<ExecutionStep>, cursor: Option<SequenceId>) {
        self.clear();
        let mut steps = steps;
        steps.sort_by_key(|s| s.sequence_id);
        for step in steps {
            self.upsert(step);
        }
        self.cursor = cursor;
        self.follow = FollowMode::Live;
    }

    /// Drop all steps, the baseline and the cursor.
    pub fn clear(&mut self) {
        self.steps.clear();
        self.by_line.clear();
        self.baseline = None;
        self.evicted_through = None;
        self.cursor = None;
        self.follow = FollowMode::Live;
    }

    /// Move the cursor to a newly arrived step when following live. A late
    /// step below the cursor leaves it where it is.
    pub fn advance_live(&mut self, id: SequenceId) -> bool {
        if self.follow != FollowMode::Live || self.cursor.is_some_and(|c| c >= id) {
            return false;
        }
        self.cursor = Some(id);
        true
    }

    /// Pin the cursor to a historical step. Unknown ids are ignored.
    pub fn pin(&mut self, id: SequenceId) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.cursor = Some(id);
        self.follow = FollowMode::Pinned;
        true
    }

    /// Resume live-follow and jump to the newest step.
    pub fn follow_live(&mut self) {
        self.follow = FollowMode::Live;
        if let Some(last) = self.last_id() {
            self.cursor = Some(last);
        }
    }

    /// Scope after every step up to and including `id`.
    ///
    /// Positions before the eviction horizon were folded into the baseline and
    /// can no longer be reconstructed; they yield `None`.
    pub fn scope_at(&self, id: SequenceId) -> Option<Scope> {
        if self.steps.is_empty() && self.baseline.is_none() {
            return None;
        }
        if let Some(horizon) = self.evicted_through.filter(|&h| id < h) {
            tracing::debug!(sequence_id = id, horizon, "Position is before the eviction horizon");
            return None;
        }
        let mut scope = self.baseline.clone().unwrap_or_default();
        for step in self.steps.iter().take_while(|s| s.sequence_id <= id) {
            scope.apply(step, self.policy);
        }
        Some(scope)
    }

    /// Scope at the cursor.
    pub fn current_scope(&self) -> Option<Scope> {
        self.cursor.and_then(|id| self.scope_at(id))
    }

    /// Most recent retained step that executed `line`.
    pub fn latest_on_line(&self, line: u32) -> Option<SequenceId> {
        self.by_line.get(&line).and_then(|ids| ids.last().copied())
    }

    /// Most recent step on `line` at or before `upto`.
    pub fn latest_on_line_before(&self, line: u32, upto: SequenceId) -> Option<SequenceId> {
        self.by_line
            .get(&line)
            .and_then(|ids| ids.range(..=upto).next_back().copied())
    }

    pub fn line_of(&self, id: SequenceId) -> Option<u32> {
        self.get(id).and_then(|s| s.source_line)
    }
}
