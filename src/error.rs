use thiserror::Error;

#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Cancellation rejected: {0}")]
    Cancellation(String),

    #[error("Audio decode failed: {0}")]
    Decode(String),

    #[error("Already connected, disconnect first")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    #[error("Failed to send message to connection task")]
    SendError,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Could not find item \"{0}\"")]
    ItemNotFound(String),

    #[error("Item \"{0}\" is not an assistant message")]
    NotAssistantItem(String),

    #[error("Item \"{0}\" has no audio content to truncate")]
    NoAudioContent(String),

    #[error("Tool \"{0}\" is already registered")]
    ToolAlreadyRegistered(String),

    #[error("Invalid tool definition: {0}")]
    InvalidTool(String),

    #[error("Capture device error: {0}")]
    Capture(String),

    #[error("Playback engine error: {0}")]
    Playback(String),

    #[error("Unsupported audio format: {0}")]
    AudioFormat(String),

    #[cfg(feature = "audio-resampling")]
    #[error("Audio resampling error: {0}")]
    AudioResampling(String),

    #[error("Controller task has stopped")]
    ControllerClosed,
}
