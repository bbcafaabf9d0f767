use super::conversation::{Conversation, InputAudio};
use super::handle::RealtimeClient;
use super::handlers::{RegisteredTool, ToolHandler, register_tool};
use crate::error::RealtimeError;
use crate::types::*;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

pub const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

pub struct RealtimeClientBuilder {
    pub(crate) api_key: String,
    pub(crate) model: String,
    pub(crate) url: String,
    pub(crate) options: SessionOptions,
    pub(crate) tools: Vec<(ToolDefinition, Arc<dyn ToolHandler>)>,
}

impl RealtimeClientBuilder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            url: DEFAULT_REALTIME_URL.to_string(),
            options: SessionOptions::default(),
            tools: Vec::new(),
        }
    }

    /// Base websocket url; the model is appended as the `model` query parameter.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.options.instructions = instructions.into();
        self
    }

    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.options.voice = voice.into();
        self
    }

    pub fn modalities(mut self, modalities: Vec<String>) -> Self {
        self.options.modalities = modalities;
        self
    }

    /// `None` selects manual turn-taking; `Some` hands turn boundaries to the server.
    pub fn turn_detection(mut self, turn_detection: Option<TurnDetection>) -> Self {
        self.options.turn_detection = turn_detection;
        self
    }

    pub fn input_audio_transcription(mut self, model: impl Into<String>) -> Self {
        self.options.input_audio_transcription = Some(InputAudioTranscription {
            model: model.into(),
        });
        self
    }

    pub fn tool<H>(mut self, definition: ToolDefinition, handler: H) -> Self
    where
        H: ToolHandler + 'static,
    {
        self.tools.push((definition, Arc::new(handler)));
        self
    }

    pub fn build(self) -> Result<RealtimeClient, RealtimeError> {
        let mut url = Url::parse(&self.url)?;
        if !self.model.is_empty() {
            url.query_pairs_mut().append_pair("model", &self.model);
        }

        let mut tools: Vec<RegisteredTool> = Vec::with_capacity(self.tools.len());
        for (definition, handler) in self.tools {
            register_tool(&mut tools, definition, handler)?;
        }
        let (tool_results_tx, tool_results_rx) = mpsc::unbounded_channel();
        tracing::info!(
            "[RealtimeClient] Built client for {} with {} tool(s).",
            url,
            tools.len()
        );

        Ok(RealtimeClient {
            url,
            api_key: self.api_key,
            options: self.options,
            tools,
            shutdown_tx: None,
            outgoing_sender: None,
            inbound_receiver: None,
            conversation: Conversation::default(),
            pending: VecDeque::new(),
            input_audio: InputAudio::default(),
            unsent: VecDeque::new(),
            tool_results_tx,
            tool_results_rx,
        })
    }
}
