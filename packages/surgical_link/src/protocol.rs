//! Control channel message types.
//!
//! Outbound messages are open JSON objects: the backend reads whichever keys
//! the caller attached. Inbound messages are decoded shape by shape; a single
//! frame may carry several shapes at once (a chat reply together with a phase
//! change, say) and every one of them becomes a [`ServerAction`].

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::capture::CapturedFrame;

// =============================================================================
// Outbound
// =============================================================================

/// A JSON object sent over the control channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboundMessage(Map<String, Value>);

impl OutboundMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep-alive no-op.
    pub fn heartbeat() -> Self {
        Self::new().with("type", "heartbeat")
    }

    /// Typed chat input, with the frame the user was looking at.
    pub fn user_text(text: &str, frame: Option<&CapturedFrame>) -> Self {
        let mut msg = Self::new()
            .with("user_input", text)
            .with("original_user_input", text);
        if let Some(frame) = frame {
            msg.insert("frame_data", frame.data_url());
        }
        msg
    }

    /// Final speech-recognition text answering a server frame request.
    pub fn frame_with_text(text: &str, frame: Option<&CapturedFrame>) -> Self {
        let mut msg = Self::new()
            .with("user_input", text)
            .with("asr_final", true);
        if let Some(frame) = frame {
            msg.insert("frame_data", frame.data_url());
        }
        msg
    }

    /// Background capture for the annotation agent.
    pub fn auto_frame(frame: &CapturedFrame) -> Self {
        Self::new()
            .with("auto_frame", true)
            .with("frame_data", frame.data_url())
    }

    /// Manually entered note.
    pub fn note(note: Value) -> Self {
        Self::new().with("note", note)
    }
}

impl From<Map<String, Value>> for OutboundMessage {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Something the server asked the client to do or show.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerAction {
    /// Final speech-recognition result (`recognized_text` + `asr_final`).
    RecognizedSpeech { text: String },
    /// Plain chat reply (`message`).
    ChatReply { text: String },
    /// Agent reply (`agent_response`), possibly flagged as a note.
    AgentResponse(AgentResponse),
    /// Structured annotation (`annotation`).
    Annotation(Value),
    /// Structured note (`note`).
    Note(Value),
    /// Surgical phase change (`current_phase`).
    PhaseChanged { phase: String },
    /// The backend switched videos (`video_updated` + `video_src`).
    VideoUpdated { src: String },
    /// The backend wants a frame (`request_frame`).
    FrameRequested { recognized_text: Option<String> },
    /// Free text (`text`).
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    pub text: String,
    pub is_note: bool,
    /// The user message that prompted this reply, when the server echoes it.
    pub original_user_input: Option<String>,
}

/// A parsed inbound JSON frame.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    raw: Value,
}

#[derive(Deserialize)]
struct SpeechShape {
    recognized_text: String,
    #[serde(default, deserialize_with = "truthy")]
    asr_final: bool,
}

#[derive(Deserialize)]
struct ChatShape {
    message: String,
}

#[derive(Deserialize)]
struct AgentShape {
    agent_response: String,
    #[serde(default, deserialize_with = "truthy")]
    is_note: bool,
    #[serde(default)]
    original_user_input: Option<String>,
    #[serde(default)]
    user_input: Option<String>,
}

#[derive(Deserialize)]
struct AnnotationShape {
    annotation: Value,
}

#[derive(Deserialize)]
struct NoteShape {
    note: Value,
}

#[derive(Deserialize)]
struct PhaseShape {
    current_phase: String,
}

#[derive(Deserialize)]
struct VideoShape {
    #[serde(deserialize_with = "truthy")]
    video_updated: bool,
    video_src: String,
}

#[derive(Deserialize)]
struct FrameRequestShape {
    #[serde(deserialize_with = "truthy")]
    request_frame: bool,
    #[serde(default)]
    recognized_text: Option<String>,
}

#[derive(Deserialize)]
struct TextShape {
    text: String,
}

/// Accept any JSON value as a flag, with JavaScript truthiness.
fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(is_truthy(&Value::deserialize(deserializer)?))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() { None } else { Some(text) }
}

fn present(value: Value) -> Option<Value> {
    if is_truthy(&value) { Some(value) } else { None }
}

impl InboundMessage {
    pub fn new(raw: Value) -> Self {
        Self { raw }
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text).map(Self::new)
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.raw.get(key)
    }

    fn decode<'a, T: Deserialize<'a>>(&'a self) -> Option<T> {
        T::deserialize(&self.raw).ok()
    }

    /// Decode every known shape present in the frame, in dispatch order.
    pub fn actions(&self) -> Vec<ServerAction> {
        let mut actions = Vec::new();
        if !self.raw.is_object() {
            return actions;
        }

        if let Some(shape) = self.decode::<SpeechShape>() {
            if shape.asr_final {
                if let Some(text) = non_empty(shape.recognized_text) {
                    actions.push(ServerAction::RecognizedSpeech { text });
                }
            }
        }

        if let Some(text) = self.decode::<ChatShape>().and_then(|s| non_empty(s.message)) {
            actions.push(ServerAction::ChatReply { text });
        }

        if let Some(shape) = self.decode::<AgentShape>() {
            if let Some(text) = non_empty(shape.agent_response) {
                let original_user_input = shape
                    .original_user_input
                    .and_then(non_empty)
                    .or_else(|| shape.user_input.and_then(non_empty));
                actions.push(ServerAction::AgentResponse(AgentResponse {
                    text,
                    is_note: shape.is_note,
                    original_user_input,
                }));
            }
        }

        if let Some(value) = self
            .decode::<AnnotationShape>()
            .and_then(|s| present(s.annotation))
        {
            actions.push(ServerAction::Annotation(value));
        }

        if let Some(value) = self.decode::<NoteShape>().and_then(|s| present(s.note)) {
            actions.push(ServerAction::Note(value));
        }

        if let Some(phase) = self
            .decode::<PhaseShape>()
            .and_then(|s| non_empty(s.current_phase))
        {
            actions.push(ServerAction::PhaseChanged { phase });
        }

        if let Some(shape) = self.decode::<VideoShape>() {
            if shape.video_updated {
                if let Some(src) = non_empty(shape.video_src) {
                    actions.push(ServerAction::VideoUpdated { src });
                }
            }
        }

        if let Some(shape) = self.decode::<FrameRequestShape>() {
            if shape.request_frame {
                actions.push(ServerAction::FrameRequested {
                    recognized_text: shape.recognized_text,
                });
            }
        }

        if let Some(text) = self.decode::<TextShape>().and_then(|s| non_empty(s.text)) {
            actions.push(ServerAction::Text(text));
        }

        actions
    }
}
