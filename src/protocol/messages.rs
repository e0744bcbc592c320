use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::DecodeError;
use super::step::{deserialize_loose_id, ExecutionStep, SequenceId};

/// Logical output stream of the traced program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Stdout,
    Stderr,
    Stdin,
}

impl StreamName {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "stdout" => Some(StreamName::Stdout),
            "stderr" => Some(StreamName::Stderr),
            "stdin" => Some(StreamName::Stdin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamName::Stdout => "stdout",
            StreamName::Stderr => "stderr",
            StreamName::Stdin => "stdin",
        }
    }
}

impl std::fmt::Display for StreamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source-line node as sent in a full sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    #[serde(deserialize_with = "deserialize_node_id")]
    pub id: String,
    #[serde(default)]
    pub data: NodeData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    #[serde(default)]
    pub source_segment: String,
    /// Frame currently executing this line, if any
    #[serde(
        rename = "framePointer",
        alias = "frame_id",
        default,
        deserialize_with = "deserialize_loose_id"
    )]
    pub frame_pointer: Option<String>,
}

/// Authoritative snapshot used to replace local state wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    #[serde(default)]
    pub nodes: Vec<NodeSnapshot>,
    #[serde(default, deserialize_with = "deserialize_timeline")]
    pub timeline: Vec<ExecutionStep>,
    /// Selected step; negative or null means nothing is selected.
    #[serde(default)]
    pub timeline_id: Option<i64>,
    /// Selected node (source line)
    #[serde(default, deserialize_with = "deserialize_loose_id")]
    pub node_id: Option<String>,
}

impl SyncPayload {
    pub fn cursor(&self) -> Option<SequenceId> {
        self.timeline_id.and_then(|id| SequenceId::try_from(id).ok())
    }
}

/// Closed set of messages the backend pushes.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Event(ExecutionStep),
    Sync(SyncPayload),
    Chunk { stream: StreamName, text: String },
    Flush(StreamName),
}

impl ServerMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::Event(_) => "event",
            ServerMessage::Sync(_) => "sync",
            ServerMessage::Chunk { stream, .. } => stream.as_str(),
            ServerMessage::Flush(_) => "flush",
        }
    }
}

/// Messages sent to the backend over the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask the backend to move execution to a recorded step
    NewTimelineId { new_timeline_id: SequenceId },
    /// Operator edited the code of a node
    UpdateNodeCode { lineno: u32, code_segment: String },
    /// Resume execution
    Continue,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Decode one push-channel frame.
pub fn decode(frame: &str) -> Result<ServerMessage, DecodeError> {
    let frame = frame.trim();
    if frame.is_empty() {
        return Err(DecodeError::EmptyFrame);
    }

    let Envelope { kind, data } = serde_json::from_str(frame)?;

    match kind.as_str() {
        "event" => serde_json::from_value(data)
            .map(ServerMessage::Event)
            .map_err(|source| DecodeError::InvalidPayload {
                kind: "event",
                source,
            }),
        "sync" => serde_json::from_value(data)
            .map(ServerMessage::Sync)
            .map_err(|source| DecodeError::InvalidPayload {
                kind: "sync",
                source,
            }),
        "stdout" | "stderr" | "stdin" => {
            let stream =
                StreamName::parse(&kind).ok_or_else(|| DecodeError::UnknownStream(kind.clone()))?;
            let text = serde_json::from_value::<Option<String>>(data)
                .map_err(|source| DecodeError::InvalidPayload {
                    kind: stream.as_str(),
                    source,
                })?
                .unwrap_or_default();
            Ok(ServerMessage::Chunk { stream, text })
        }
        "flush" => {
            let name = serde_json::from_value::<String>(data).map_err(|source| {
                DecodeError::InvalidPayload {
                    kind: "flush",
                    source,
                }
            })?;
            StreamName::parse(&name)
                .map(ServerMessage::Flush)
                .ok_or(DecodeError::UnknownStream(name))
        }
        other => Err(DecodeError::UnknownType(other.to_string())),
    }
}

/// Encode an outbound message as a text frame.
pub fn encode(message: &ClientMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

fn deserialize_node_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_loose_id(deserializer)?.ok_or_else(|| de::Error::custom("node id is null"))
}

fn deserialize_timeline<'de, D>(deserializer: D) -> Result<Vec<ExecutionStep>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Option<ExecutionStep>>>::deserialize(deserializer)?;
    Ok(raw.unwrap_or_default().into_iter().flatten().collect())
}
