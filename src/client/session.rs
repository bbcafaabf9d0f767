use super::conversation::ItemSnapshot;
use super::handlers::ToolHandler;
use crate::error::RealtimeError;
use crate::types::{ContentPart, RealtimeEvent, SessionUpdate, ToolDefinition, TurnDetectionKind};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Incremental change attached to a conversation update.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemDelta {
    /// Agent audio, little-endian PCM16.
    Audio(Vec<u8>),
    /// User audio cut from the input buffer for this item.
    InputAudio(Vec<i16>),
    Transcript(String),
    Text(String),
    Arguments(String),
    /// The server dropped audio after `audio_end_ms`.
    Truncated { audio_end_ms: u64 },
    Removed,
}

/// Everything a [`RemoteSession`] reports to its owner, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Raw protocol event in either direction.
    Realtime(RealtimeEvent),
    ConversationUpdated {
        item_id: String,
        delta: Option<ItemDelta>,
    },
    ItemCompleted {
        item_id: String,
    },
    ResponseDone,
    /// The server detected user speech.
    Interrupted,
    /// An `error` event sent by the server.
    Error(String),
    /// An inbound frame could not be parsed or applied.
    ProtocolError { message: String, raw: String },
    /// The connection ended. Carries the close reason when there was one.
    Closed(Option<String>),
}

/// The remote conversational agent, as seen by the session controller.
#[async_trait]
pub trait RemoteSession: Send {
    async fn connect(&mut self) -> Result<(), RealtimeError>;

    /// Closes the connection and clears the remote conversation state.
    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Waits for the next event. Returns `None` once disconnected and drained.
    async fn next_event(&mut self) -> Option<SessionEvent>;

    async fn update_session(&mut self, update: SessionUpdate) -> Result<(), RealtimeError>;

    fn turn_detection(&self) -> Option<TurnDetectionKind>;

    async fn add_tool(
        &mut self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RealtimeError>;

    /// Sends a user message (if `content` is not empty) and requests a response.
    async fn send_user_message_content(
        &mut self,
        content: Vec<ContentPart>,
    ) -> Result<(), RealtimeError>;

    /// Appends one mono PCM16 frame to the remote input buffer.
    async fn append_input_audio(&mut self, frame: &[i16]) -> Result<(), RealtimeError>;

    /// Requests a response, committing buffered input audio in manual mode.
    async fn create_response(&mut self) -> Result<(), RealtimeError>;

    /// Cancels the in-flight response and truncates `item_id`'s audio at `played`.
    async fn cancel_response(
        &mut self,
        item_id: &str,
        played: Duration,
    ) -> Result<(), RealtimeError>;

    async fn delete_item(&mut self, item_id: &str) -> Result<(), RealtimeError>;

    fn items(&self) -> Vec<ItemSnapshot>;
}
