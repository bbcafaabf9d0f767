//! Wire types for the realtime websocket protocol.
//!
//! Every frame is a JSON object tagged by `type`. Client events are only ever
//! serialized; server events are parsed from a `serde_json::Value` so the raw
//! payload stays available for the event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    /// Function calls and their outputs carry no wire role.
    Tool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    #[default]
    Message,
    FunctionCall,
    FunctionCallOutput,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WireItemStatus {
    InProgress,
    Completed,
    Incomplete,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText {
        text: String,
    },
    InputAudio {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript: Option<String>,
    },
    Text {
        #[serde(default)]
        text: String,
    },
    Audio {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl ContentPart {
    pub fn input_text(text: impl Into<String>) -> Self {
        ContentPart::InputText { text: text.into() }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Item {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: ItemType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WireItemStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl Item {
    pub fn user_message(content: Vec<ContentPart>) -> Self {
        Self {
            kind: ItemType::Message,
            role: Some(Role::User),
            content,
            ..Default::default()
        }
    }

    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            kind: ItemType::FunctionCallOutput,
            call_id: Some(call_id.into()),
            output: Some(output.into()),
            ..Default::default()
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnDetectionKind {
    ServerVad,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: TurnDetectionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_padding_ms: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub silence_duration_ms: Option<u32>,
}

impl TurnDetection {
    pub fn server_vad() -> Self {
        Self {
            kind: TurnDetectionKind::ServerVad,
            threshold: None,
            prefix_padding_ms: None,
            silence_duration_ms: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InputAudioTranscription {
    pub model: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            kind: "function".to_string(),
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Full session configuration sent with every `session.update`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub input_audio_transcription: Option<InputAudioTranscription>,
    pub turn_detection: Option<TurnDetection>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: String::new(),
            voice: "alloy".to_string(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            input_audio_transcription: None,
            turn_detection: None,
            tools: Vec::new(),
            tool_choice: "auto".to_string(),
        }
    }
}

/// Partial session options merged field-by-field into [`SessionOptions`].
///
/// The nested `Option`s distinguish "leave unchanged" (`None`) from
/// "set to null" (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub instructions: Option<String>,
    pub voice: Option<String>,
    pub modalities: Option<Vec<String>>,
    pub input_audio_transcription: Option<Option<InputAudioTranscription>>,
    pub turn_detection: Option<Option<TurnDetection>>,
}

impl SessionUpdate {
    pub fn turn_detection(turn_detection: Option<TurnDetection>) -> Self {
        Self {
            turn_detection: Some(turn_detection),
            ..Default::default()
        }
    }
}

impl SessionOptions {
    pub fn apply(&mut self, update: SessionUpdate) {
        if let Some(instructions) = update.instructions {
            self.instructions = instructions;
        }
        if let Some(voice) = update.voice {
            self.voice = voice;
        }
        if let Some(modalities) = update.modalities {
            self.modalities = modalities;
        }
        if let Some(transcription) = update.input_audio_transcription {
            self.input_audio_transcription = transcription;
        }
        if let Some(turn_detection) = update.turn_detection {
            self.turn_detection = turn_detection;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionOptions },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear,
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: Item },
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        item_id: String,
        content_index: u32,
        audio_end_ms: u64,
    },
    #[serde(rename = "conversation.item.delete")]
    ConversationItemDelete { item_id: String },
    #[serde(rename = "response.create")]
    ResponseCreate,
    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::InputAudioBufferCommit => "input_audio_buffer.commit",
            ClientEvent::InputAudioBufferClear => "input_audio_buffer.clear",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ConversationItemTruncate { .. } => "conversation.item.truncate",
            ClientEvent::ConversationItemDelete { .. } => "conversation.item.delete",
            ClientEvent::ResponseCreate => "response.create",
            ClientEvent::ResponseCancel => "response.cancel",
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorDetails {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
    #[serde(default)]
    pub param: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: Value,
    },
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: Value,
    },
    #[serde(rename = "error")]
    Error { error: ErrorDetails },
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated { item: Item },
    #[serde(rename = "conversation.item.truncated")]
    ConversationItemTruncated {
        item_id: String,
        #[serde(default)]
        content_index: u32,
        audio_end_ms: u64,
    },
    #[serde(rename = "conversation.item.deleted")]
    ConversationItemDeleted { item_id: String },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputAudioTranscriptionCompleted {
        item_id: String,
        #[serde(default)]
        content_index: u32,
        transcript: String,
    },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted { item_id: String, audio_start_ms: u64 },
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped { item_id: String, audio_end_ms: u64 },
    #[serde(rename = "response.created")]
    ResponseCreated {
        #[serde(default)]
        response: Value,
    },
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: Value,
    },
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { item: Item },
    #[serde(rename = "response.output_item.done")]
    OutputItemDone { item: Item },
    #[serde(rename = "response.content_part.added")]
    ContentPartAdded {
        item_id: String,
        #[serde(default)]
        content_index: u32,
        part: ContentPart,
    },
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta { item_id: String, delta: String },
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        item_id: String,
        #[serde(default)]
        content_index: u32,
        delta: String,
    },
    #[serde(rename = "response.text.delta")]
    TextDelta { item_id: String, delta: String },
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta { item_id: String, delta: String },
    #[serde(other)]
    Other,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Client,
    Server,
}

/// One protocol event in either direction, as seen by the event log.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RealtimeEvent {
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    pub type_name: String,
    pub payload: Value,
}

impl RealtimeEvent {
    pub fn new(source: EventSource, type_name: impl Into<String>, payload: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            source,
            type_name: type_name.into(),
            payload,
        }
    }
}
