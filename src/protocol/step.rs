use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::diff::Diff;

/// Backend-assigned key of a step. Stable across reconnects; never an array offset.
pub type SequenceId = u64;

/// Interpreter event classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StepKind {
    Line,
    Call,
    Return,
    Exception,
    #[default]
    Other,
}

impl StepKind {
    /// Parse an event name. The backend occasionally sends names wrapped in
    /// literal quotes (`"\"line\""`), which are stripped.
    pub fn parse(raw: &str) -> Self {
        let name = raw.trim().trim_matches('"').trim().to_ascii_lowercase();
        match name.as_str() {
            "line" => StepKind::Line,
            "call" => StepKind::Call,
            "return" => StepKind::Return,
            "exception" => StepKind::Exception,
            _ => StepKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Line => "line",
            StepKind::Call => "call",
            StepKind::Return => "return",
            StepKind::Exception => "exception",
            StepKind::Other => "other",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StepKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StepKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map(StepKind::parse).unwrap_or_default())
    }
}

/// A field that distinguishes "not sent" from an explicit `null`.
///
/// Return values and errors need the distinction so that the return policy can
/// decide whether an explicit `null` clears a previously reported value.
#[derive(Debug, Clone, PartialEq)]
pub enum Reported<T> {
    Absent,
    Null,
    Value(T),
}

impl<T> Default for Reported<T> {
    fn default() -> Self {
        Reported::Absent
    }
}

impl<T> Reported<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Reported::Absent)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Reported::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl<T> From<Option<T>> for Reported<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Reported::Value(v),
            None => Reported::Null,
        }
    }
}

impl<'de, T> Deserialize<'de> for Reported<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<T>::deserialize(deserializer)?.into())
    }
}

impl<T> Serialize for Reported<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Reported::Value(v) => v.serialize(serializer),
            _ => serializer.serialize_none(),
        }
    }
}

/// One interpreter event pushed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    #[serde(rename = "id", alias = "sequence_id", alias = "sequenceId")]
    pub sequence_id: SequenceId,

    #[serde(rename = "event", alias = "kind", default)]
    pub kind: StepKind,

    #[serde(
        rename = "line_number",
        alias = "source_line",
        alias = "sourceLine",
        default
    )]
    pub source_line: Option<u32>,

    #[serde(
        alias = "frameId",
        default,
        deserialize_with = "deserialize_loose_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub frame_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,

    /// Code object name, or the file name for module-level events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_segment: Option<String>,

    #[serde(
        rename = "global_diff",
        alias = "globals_diff",
        alias = "globalsDiff",
        default
    )]
    pub globals_diff: Diff,

    #[serde(
        rename = "local_diff",
        alias = "locals_diff",
        alias = "localsDiff",
        default
    )]
    pub locals_diff: Diff,

    #[serde(alias = "returnValue", default, skip_serializing_if = "Reported::is_absent")]
    pub return_value: Reported<Value>,

    #[serde(default, skip_serializing_if = "Reported::is_absent")]
    pub error: Reported<Value>,

    #[serde(default, skip_serializing_if = "Reported::is_absent")]
    pub traceback: Reported<String>,
}

impl ExecutionStep {
    pub fn new(sequence_id: SequenceId, kind: StepKind) -> Self {
        Self {
            sequence_id,
            kind,
            source_line: None,
            frame_id: None,
            file: None,
            function: None,
            target: None,
            source_segment: None,
            globals_diff: Diff::default(),
            locals_diff: Diff::default(),
            return_value: Reported::Absent,
            error: Reported::Absent,
            traceback: Reported::Absent,
        }
    }

    pub fn line(sequence_id: SequenceId, line: u32) -> Self {
        Self::new(sequence_id, StepKind::Line).at_line(line)
    }

    pub fn at_line(mut self, line: u32) -> Self {
        self.source_line = Some(line);
        self
    }

    pub fn in_frame(mut self, frame_id: impl Into<String>) -> Self {
        self.frame_id = Some(frame_id.into());
        self
    }

    pub fn with_globals(mut self, diff: Diff) -> Self {
        self.globals_diff = diff;
        self
    }

    pub fn with_locals(mut self, diff: Diff) -> Self {
        self.locals_diff = diff;
        self
    }

    pub fn with_return(mut self, value: Option<Value>) -> Self {
        self.return_value = value.into();
        self
    }

    pub fn with_error(mut self, value: Option<Value>) -> Self {
        self.error = value.into();
        self
    }

    /// Short label used for timeline entries: the line number for `line`
    /// events, otherwise the upper-cased initial of the event kind.
    pub fn glyph(&self) -> String {
        match (self.kind, self.source_line) {
            (StepKind::Line, Some(line)) => line.to_string(),
            (kind, _) => kind
                .as_str()
                .chars()
                .next()
                .map(|c| c.to_ascii_uppercase().to_string())
                .unwrap_or_default(),
        }
    }
}

/// Accept ids sent either as strings or as numbers and normalise them to strings.
pub(crate) fn deserialize_loose_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}
