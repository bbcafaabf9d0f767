use super::RealtimeClientBuilder;
use super::connection::{Inbound, spawn_connection_task};
use super::conversation::{Conversation, InputAudio, ItemSnapshot};
use super::handlers::{RegisteredTool, ToolHandler, register_tool, run_tool};
use super::session::{RemoteSession, SessionEvent};
use crate::SAMPLE_RATE_HZ;
use crate::audio::samples_to_bytes;
use crate::error::RealtimeError;
use crate::types::{
    ClientEvent, ContentPart, EventSource, Item, ItemType, RealtimeEvent, ServerEvent,
    SessionOptions, SessionUpdate, ToolDefinition, TurnDetectionKind,
};
use async_trait::async_trait;
use base64::Engine as _;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, error, info, trace, warn};
use url::Url;

const CHANNEL_CAPACITY: usize = 100;
/// Input audio kept for speech spans that have not started yet (10s).
const INPUT_AUDIO_RETENTION: usize = SAMPLE_RATE_HZ as usize * 10;
/// Upper bound on what a started span can hold on to (5 minutes).
const MAX_OPEN_SPAN: usize = SAMPLE_RATE_HZ as usize * 300;

/// Websocket-backed [`RemoteSession`].
///
/// Owned by a single task: all state changes happen inside `&mut self` calls,
/// and server frames are only applied while [`RemoteSession::next_event`] runs.
pub struct RealtimeClient {
    pub(crate) url: Url,
    pub(crate) api_key: String,
    pub(crate) options: SessionOptions,
    pub(crate) tools: Vec<RegisteredTool>,

    pub(crate) shutdown_tx: Option<oneshot::Sender<()>>,
    pub(crate) outgoing_sender: Option<mpsc::Sender<ClientEvent>>,
    pub(crate) inbound_receiver: Option<mpsc::Receiver<Inbound>>,

    pub(crate) conversation: Conversation,
    pub(crate) pending: VecDeque<SessionEvent>,
    pub(crate) input_audio: InputAudio,
    /// Tool replies not yet handed to the connection task. An event leaves the
    /// queue only once it has been sent.
    pub(crate) unsent: VecDeque<ClientEvent>,

    /// Outputs of tool calls running on their own tasks, keyed by call id.
    pub(crate) tool_results_tx: mpsc::UnboundedSender<(String, Value)>,
    pub(crate) tool_results_rx: mpsc::UnboundedReceiver<(String, Value)>,
}

/// What woke [`RemoteSession::next_event`] up.
enum Wake {
    Inbound(Option<Inbound>),
    ToolResult(String, Value),
}

impl RealtimeClient {
    pub fn builder(api_key: impl Into<String>, model: impl Into<String>) -> RealtimeClientBuilder {
        RealtimeClientBuilder::new(api_key, model)
    }

    /// Options as sent in `session.update`, including registered tools.
    pub fn session_options(&self) -> SessionOptions {
        let mut options = self.options.clone();
        options.tools = self
            .tools
            .iter()
            .map(|tool| tool.definition.clone())
            .collect();
        options
    }

    async fn send(&mut self, event: ClientEvent) -> Result<(), RealtimeError> {
        let Some(sender) = &self.outgoing_sender else {
            error!(
                "[RealtimeClient] Cannot send {}: not connected.",
                event.type_name()
            );
            return Err(RealtimeError::NotConnected);
        };
        let payload = serde_json::to_value(&event)?;
        let type_name = event.type_name();
        if let Err(e) = sender.send(event).await {
            error!(
                "[RealtimeClient] Failed to send {} to connection task: {}",
                type_name, e
            );
            return Err(RealtimeError::SendError);
        }
        self.pending.push_back(SessionEvent::Realtime(RealtimeEvent::new(
            EventSource::Client,
            type_name,
            payload,
        )));
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(()).is_err() {
                debug!("[RealtimeClient] Connection task already gone.");
            } else {
                info!("[RealtimeClient] Shutdown signal sent to connection task.");
            }
        }
        self.outgoing_sender = None;
        self.inbound_receiver = None;
        self.conversation.clear();
        self.input_audio.clear();
        self.unsent.clear();
    }

    /// Parses one inbound frame and queues the notifications it produces.
    fn handle_inbound(&mut self, raw: String) {
        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!("[RealtimeClient] Unparseable frame: {}", e);
                self.pending.push_back(SessionEvent::ProtocolError {
                    message: format!("Invalid JSON: {}", e),
                    raw,
                });
                return;
            }
        };
        let Some(type_name) = value.get("type").and_then(Value::as_str).map(str::to_owned) else {
            warn!("[RealtimeClient] Frame without a type field.");
            self.pending.push_back(SessionEvent::ProtocolError {
                message: "Event is missing a string \"type\"".to_string(),
                raw,
            });
            return;
        };
        trace!("[RealtimeClient] Received {}.", type_name);
        self.pending.push_back(SessionEvent::Realtime(RealtimeEvent::new(
            EventSource::Server,
            type_name.clone(),
            value.clone(),
        )));

        let event: ServerEvent = match serde_json::from_value(value) {
            Ok(event) => event,
            Err(e) => {
                warn!("[RealtimeClient] Malformed {} event: {}", type_name, e);
                self.pending.push_back(SessionEvent::ProtocolError {
                    message: format!("Malformed {}: {}", type_name, e),
                    raw,
                });
                return;
            }
        };
        if let ServerEvent::Other = event {
            debug!("[RealtimeClient] Unhandled event type {}.", type_name);
        }

        let notices = match self.conversation.process(&event, &self.input_audio) {
            Ok(notices) => notices,
            Err(e) => {
                warn!("[RealtimeClient] Could not apply {}: {}", type_name, e);
                self.pending.push_back(SessionEvent::ProtocolError {
                    message: e.to_string(),
                    raw,
                });
                return;
            }
        };

        let mut completed_calls = Vec::new();
        for notice in notices {
            if let SessionEvent::ItemCompleted { item_id } = &notice {
                if let Some(call) = self
                    .conversation
                    .get(item_id)
                    .filter(|item| item.kind == ItemType::FunctionCall)
                    .and_then(|item| item.tool_call.clone())
                {
                    completed_calls.push(call);
                }
            }
            self.pending.push_back(notice);
        }
        for call in completed_calls {
            info!(
                "[RealtimeClient] Running tool {} (call {}).",
                call.name, call.call_id
            );
            let tools = self.tools.clone();
            let results = self.tool_results_tx.clone();
            tokio::spawn(async move {
                let output = run_tool(&tools, &call.name, &call.arguments).await;
                if results.send((call.call_id, output)).is_err() {
                    debug!("[RealtimeClient] Tool result dropped: client gone.");
                }
            });
        }
    }

    fn queue_tool_output(&mut self, call_id: String, output: Value) {
        let item = Item::function_call_output(call_id, output.to_string());
        self.unsent
            .push_back(ClientEvent::ConversationItemCreate { item });
        self.unsent.push_back(ClientEvent::ResponseCreate);
    }

    /// Sends queued tool replies. Cancelling this leaves the unsent remainder
    /// queued for the next call.
    async fn flush_unsent(&mut self) {
        while let Some(event) = self.unsent.front().cloned() {
            let type_name = event.type_name();
            if let Err(e) = self.send(event).await {
                error!(
                    "[RealtimeClient] Failed to send queued {}: {}",
                    type_name, e
                );
            }
            self.unsent.pop_front();
        }
    }

    /// Drops input audio no open or future speech span can refer to.
    fn trim_input_audio(&mut self) {
        let end = self.input_audio.end();
        let keep_from = match self.conversation.open_speech_start() {
            Some(start) => start.max(end.saturating_sub(MAX_OPEN_SPAN)),
            None => end.saturating_sub(INPUT_AUDIO_RETENTION),
        };
        self.input_audio.discard_before(keep_from);
    }
}

#[async_trait]
impl RemoteSession for RealtimeClient {
    async fn connect(&mut self) -> Result<(), RealtimeError> {
        if self.is_connected() {
            return Err(RealtimeError::AlreadyConnected);
        }
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut request = self.url.as_str().into_client_request()?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| RealtimeError::Connection(format!("Invalid API key header: {}", e)))?;
        request.headers_mut().insert("Authorization", auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        info!("[RealtimeClient] Connecting to {}.", self.url);
        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RealtimeError::Connection(e.to_string()))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (outgoing_sender, outgoing_receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let (inbound_sender, inbound_receiver) = mpsc::channel(CHANNEL_CAPACITY);
        spawn_connection_task(ws_stream, outgoing_receiver, inbound_sender, shutdown_rx);

        self.shutdown_tx = Some(shutdown_tx);
        self.outgoing_sender = Some(outgoing_sender);
        self.inbound_receiver = Some(inbound_receiver);
        self.conversation.clear();
        self.input_audio.clear();
        self.pending.clear();
        self.unsent.clear();
        while self.tool_results_rx.try_recv().is_ok() {}
        info!("[RealtimeClient] Connected.");

        let session = self.session_options();
        self.send(ClientEvent::SessionUpdate { session }).await
    }

    async fn disconnect(&mut self) {
        info!("[RealtimeClient] Disconnect requested.");
        self.teardown();
        self.pending.clear();
    }

    fn is_connected(&self) -> bool {
        self.outgoing_sender.is_some()
    }

    async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            self.flush_unsent().await;
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            let receiver = self.inbound_receiver.as_mut()?;
            let wake = tokio::select! {
                inbound = receiver.recv() => Wake::Inbound(inbound),
                Some((call_id, output)) = self.tool_results_rx.recv() => {
                    Wake::ToolResult(call_id, output)
                }
            };
            match wake {
                Wake::ToolResult(call_id, output) => self.queue_tool_output(call_id, output),
                Wake::Inbound(Some(Inbound::Text(raw))) => self.handle_inbound(raw),
                Wake::Inbound(Some(Inbound::Closed(reason))) => {
                    info!("[RealtimeClient] Connection closed: {:?}", reason);
                    self.teardown();
                    return Some(SessionEvent::Closed(reason));
                }
                Wake::Inbound(None) => {
                    info!("[RealtimeClient] Connection task ended without a close notice.");
                    self.teardown();
                    return Some(SessionEvent::Closed(None));
                }
            }
        }
    }

    async fn update_session(&mut self, update: SessionUpdate) -> Result<(), RealtimeError> {
        let previous_mode = self.turn_detection();
        self.options.apply(update);
        if self.turn_detection() != previous_mode && !self.input_audio.is_empty() {
            debug!(
                "[RealtimeClient] Turn detection changed, dropping {} buffered input samples.",
                self.input_audio.len()
            );
            let end = self.input_audio.end();
            self.input_audio.discard_before(end);
        }
        if self.is_connected() {
            let session = self.session_options();
            self.send(ClientEvent::SessionUpdate { session }).await?;
        }
        Ok(())
    }

    fn turn_detection(&self) -> Option<TurnDetectionKind> {
        self.options.turn_detection.as_ref().map(|t| t.kind)
    }

    async fn add_tool(
        &mut self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RealtimeError> {
        info!("[RealtimeClient] Registering tool {}.", definition.name);
        register_tool(&mut self.tools, definition, handler)?;
        if self.is_connected() {
            let session = self.session_options();
            self.send(ClientEvent::SessionUpdate { session }).await?;
        }
        Ok(())
    }

    async fn send_user_message_content(
        &mut self,
        content: Vec<ContentPart>,
    ) -> Result<(), RealtimeError> {
        if !content.is_empty() {
            self.send(ClientEvent::ConversationItemCreate {
                item: Item::user_message(content),
            })
            .await?;
        }
        self.create_response().await
    }

    async fn append_input_audio(&mut self, frame: &[i16]) -> Result<(), RealtimeError> {
        if frame.is_empty() {
            return Ok(());
        }
        let audio = base64::engine::general_purpose::STANDARD.encode(samples_to_bytes(frame));
        self.send(ClientEvent::InputAudioBufferAppend { audio })
            .await?;
        self.input_audio.extend(frame);
        if self.options.turn_detection.is_some() {
            self.trim_input_audio();
        }
        Ok(())
    }

    async fn create_response(&mut self) -> Result<(), RealtimeError> {
        if self.options.turn_detection.is_none() && !self.input_audio.is_empty() {
            self.send(ClientEvent::InputAudioBufferCommit).await?;
            let committed = self.input_audio.take();
            debug!(
                "[RealtimeClient] Committed {} input samples.",
                committed.len()
            );
            self.conversation.queue_input_audio(committed);
        }
        self.send(ClientEvent::ResponseCreate).await
    }

    async fn cancel_response(
        &mut self,
        item_id: &str,
        played: Duration,
    ) -> Result<(), RealtimeError> {
        self.send(ClientEvent::ResponseCancel).await?;

        let item = self
            .conversation
            .get(item_id)
            .ok_or_else(|| RealtimeError::ItemNotFound(item_id.to_string()))?;
        if !item.is_assistant_message() {
            return Err(RealtimeError::NotAssistantItem(item_id.to_string()));
        }
        let content_index = item
            .audio_index
            .ok_or_else(|| RealtimeError::NoAudioContent(item_id.to_string()))?;

        let audio_end_ms = played.as_millis() as u64;
        info!(
            "[RealtimeClient] Truncating {} at {}ms.",
            item_id, audio_end_ms
        );
        self.send(ClientEvent::ConversationItemTruncate {
            item_id: item_id.to_string(),
            content_index,
            audio_end_ms,
        })
        .await
    }

    async fn delete_item(&mut self, item_id: &str) -> Result<(), RealtimeError> {
        self.send(ClientEvent::ConversationItemDelete {
            item_id: item_id.to_string(),
        })
        .await
    }

    fn items(&self) -> Vec<ItemSnapshot> {
        self.conversation.items().to_vec()
    }
}
