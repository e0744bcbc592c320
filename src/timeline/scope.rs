use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::{ExecutionStep, Reported, StepKind};

/// How a reported return value or error carries over to later steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReturnPolicy {
    /// Once reported, a value stays until another non-null value replaces it.
    #[default]
    Sticky,
    /// An explicit `null` on a later step clears the value.
    ExplicitNullClears,
    /// The value is cleared whenever execution moves to a different frame.
    FrameScoped,
}

impl ReturnPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnPolicy::Sticky => "sticky",
            ReturnPolicy::ExplicitNullClears => "explicit-null-clears",
            ReturnPolicy::FrameScoped => "frame-scoped",
        }
    }
}

impl std::fmt::Display for ReturnPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReturnPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "sticky" => Ok(ReturnPolicy::Sticky),
            "explicit-null-clears" => Ok(ReturnPolicy::ExplicitNullClears),
            "frame-scoped" => Ok(ReturnPolicy::FrameScoped),
            other => Err(format!("unknown return policy: {other}")),
        }
    }
}

/// Program state visible at one timeline position.
///
/// Maps are ordered so that two reconstructions of the same steps serialize to
/// identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Scope {
    pub event: Option<StepKind>,
    pub file: Option<String>,
    pub function: Option<String>,
    pub frame_id: Option<String>,
    #[serde(rename = "line_number")]
    pub source_line: Option<u32>,
    pub globals: BTreeMap<String, Value>,
    pub locals: BTreeMap<String, Value>,
    pub return_value: Option<Value>,
    pub error: Option<Value>,
    pub traceback: Option<String>,
}

impl Scope {
    /// Fold one step onto this scope.
    pub fn apply(&mut self, step: &ExecutionStep, policy: ReturnPolicy) {
        if policy == ReturnPolicy::FrameScoped && self.frame_id != step.frame_id {
            self.return_value = None;
            self.error = None;
            self.traceback = None;
        }

        self.event = Some(step.kind);
        self.file = step.file.clone();
        self.function = step.function.clone();
        self.frame_id = step.frame_id.clone();
        self.source_line = step.source_line;

        step.globals_diff.apply_to(&mut self.globals);
        step.locals_diff.apply_to(&mut self.locals);

        carry(&mut self.return_value, &step.return_value, policy);
        carry(&mut self.error, &step.error, policy);
        carry(&mut self.traceback, &step.traceback, policy);
    }
}

fn carry<T: Clone>(slot: &mut Option<T>, reported: &Reported<T>, policy: ReturnPolicy) {
    match reported {
        Reported::Value(v) => *slot = Some(v.clone()),
        Reported::Null if policy == ReturnPolicy::ExplicitNullClears => *slot = None,
        Reported::Null | Reported::Absent => {}
    }
}

/// Reconstruct the scope at `position` (an index into `steps`).
///
/// Returns `None` when there is no position. A position past the end clamps to
/// the last step.
pub fn derive_scope<'a, I>(steps: I, position: Option<usize>, policy: ReturnPolicy) -> Option<Scope>
where
    I: IntoIterator<Item = &'a ExecutionStep>,
{
    derive_scope_from(None, steps, position, policy)
}

/// Like [`derive_scope`], but starting from a previously folded baseline.
pub fn derive_scope_from<'a, I>(
    baseline: Option<&Scope>,
    steps: I,
    position: Option<usize>,
    policy: ReturnPolicy,
) -> Option<Scope>
where
    I: IntoIterator<Item = &'a ExecutionStep>,
{
    let position = position?;
    let mut scope = baseline.cloned().unwrap_or_default();
    for step in steps.into_iter().take(position.saturating_add(1)) {
        scope.apply(step, policy);
    }
    Some(scope)
}
