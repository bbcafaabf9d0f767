use super::command::{Command, ControllerHandle};
use super::config::{ControllerConfig, InterviewBrief};
use super::event_log::EventLog;
use super::memory::MemoryStore;
use super::reconciler::{ConversationItem, ConversationReconciler};
use super::turn::{TurnMode, TurnState};
use crate::audio::{AudioCapture, AudioPlayback};
use crate::client::{RemoteSession, SessionEvent};
use crate::error::RealtimeError;
use crate::types::{ContentPart, SessionUpdate};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

const COMMAND_CAPACITY: usize = 32;
const FRAME_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Session {
    pub status: SessionStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub turn_mode: TurnMode,
}

/// One input serviced by [`SessionController::step`].
enum Input {
    Command(Command),
    Frame(Vec<i16>),
    Remote(Option<SessionEvent>),
}

/// Owns one realtime interview session and the three collaborators it drives.
///
/// All state lives in this struct and is only touched from `&mut self`
/// methods, so remote notifications, captured frames and operator commands are
/// handled strictly one at a time by [`SessionController::run`].
pub struct SessionController<R, C, P>
where
    R: RemoteSession,
    C: AudioCapture,
    P: AudioPlayback,
{
    pub(super) config: ControllerConfig,
    pub(super) remote: R,
    pub(super) capture: C,
    pub(super) playback: P,

    pub(super) session: Session,
    pub(super) turn_state: TurnState,
    pub(super) reconciler: ConversationReconciler,
    pub(super) event_log: EventLog,
    pub(super) memory: MemoryStore,
    pub(super) editor_text: String,

    pub(super) frames_tx: mpsc::Sender<Vec<i16>>,
    pub(super) frames_rx: mpsc::Receiver<Vec<i16>>,
    commands_tx: mpsc::Sender<Command>,
    commands_rx: mpsc::Receiver<Command>,
}

impl<R, C, P> SessionController<R, C, P>
where
    R: RemoteSession,
    C: AudioCapture,
    P: AudioPlayback,
{
    /// Applies `config` to the remote session options and registers the
    /// `set_memory` tool.
    pub async fn new(
        mut remote: R,
        capture: C,
        playback: P,
        config: ControllerConfig,
    ) -> Result<Self, RealtimeError> {
        let memory = MemoryStore::default();
        let (definition, handler) = memory.tool();
        remote.add_tool(definition, handler).await?;

        let mut update = SessionUpdate::turn_detection(config.turn_mode.turn_detection());
        if !config.instructions.is_empty() {
            update.instructions = Some(config.instructions.clone());
        }
        if let Some(model) = &config.transcription_model {
            update.input_audio_transcription = Some(Some(crate::types::InputAudioTranscription {
                model: model.clone(),
            }));
        }
        remote.update_session(update).await?;

        let (frames_tx, frames_rx) = mpsc::channel(FRAME_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);
        info!(
            "[Controller] Created with turn mode {:?}, {} samples per frame.",
            config.turn_mode, config.frame_size
        );

        Ok(Self {
            reconciler: ConversationReconciler::new(config.sample_rate),
            session: Session {
                turn_mode: config.turn_mode,
                ..Default::default()
            },
            config,
            remote,
            capture,
            playback,
            turn_state: TurnState::Idle,
            event_log: EventLog::default(),
            memory,
            editor_text: String::new(),
            frames_tx,
            frames_rx,
            commands_tx,
            commands_rx,
        })
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle::new(self.commands_tx.clone())
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_connected(&self) -> bool {
        self.session.status == SessionStatus::Connected
    }

    pub fn turn_state(&self) -> TurnState {
        self.turn_state
    }

    pub fn turn_mode(&self) -> TurnMode {
        self.session.turn_mode
    }

    pub fn items(&self) -> &[ConversationItem] {
        self.reconciler.items()
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn editor_text(&self) -> &str {
        &self.editor_text
    }

    pub fn decode_count(&self) -> usize {
        self.reconciler.decode_count()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Opens capture, playback and the remote session, then sends the seed
    /// instruction. Any failure unwinds whatever was opened.
    pub async fn connect(&mut self, brief: &InterviewBrief) -> Result<(), RealtimeError> {
        if self.session.status != SessionStatus::Disconnected {
            return Err(RealtimeError::AlreadyConnected);
        }
        info!("[Controller] Connecting.");
        self.session.status = SessionStatus::Connecting;
        self.clear_transient_state();

        if let Err(e) = self.capture.begin().await {
            error!("[Controller] Capture device failed to open: {}", e);
            self.session.status = SessionStatus::Disconnected;
            return Err(RealtimeError::Connection(format!("capture: {}", e)));
        }
        if let Err(e) = self.playback.connect().await {
            error!("[Controller] Playback engine failed to open: {}", e);
            self.unwind_capture().await;
            self.session.status = SessionStatus::Disconnected;
            return Err(RealtimeError::Connection(format!("playback: {}", e)));
        }
        if let Err(e) = self.remote.connect().await {
            error!("[Controller] Remote session failed to open: {}", e);
            self.playback.interrupt().await;
            self.unwind_capture().await;
            self.session.status = SessionStatus::Disconnected;
            return Err(match e {
                RealtimeError::Connection(_) => e,
                other => RealtimeError::Connection(format!("remote: {}", other)),
            });
        }

        self.session = Session {
            status: SessionStatus::Connected,
            start_time: Some(Utc::now()),
            turn_mode: self.session.turn_mode,
        };

        let seed = brief.seed_instruction();
        if let Err(e) = self
            .remote
            .send_user_message_content(vec![ContentPart::input_text(seed)])
            .await
        {
            error!("[Controller] Seed instruction not sent: {}", e);
            self.disconnect().await;
            self.clear_transient_state();
            return Err(RealtimeError::Connection(format!("seed: {}", e)));
        }

        if self.session.turn_mode == TurnMode::ServerVad {
            if let Err(e) = self.capture.record(self.frames_tx.clone()).await {
                error!("[Controller] Continuous capture failed to start: {}", e);
                self.disconnect().await;
                self.clear_transient_state();
                return Err(RealtimeError::Connection(format!("capture: {}", e)));
            }
        }
        info!(
            "[Controller] Connected in {:?} mode.",
            self.session.turn_mode
        );
        Ok(())
    }

    /// Tears the session down. The transcript and event log are kept.
    pub async fn disconnect(&mut self) {
        if self.session.status == SessionStatus::Disconnected {
            debug!("[Controller] Disconnect ignored: not connected.");
            return;
        }
        info!("[Controller] Disconnecting.");
        self.session.status = SessionStatus::Disconnected;
        self.turn_state = TurnState::Idle;

        self.remote.disconnect().await;
        if let Err(e) = self.capture.end().await {
            warn!("[Controller] Capture device did not close cleanly: {}", e);
        }
        if let Some(track) = self.playback.interrupt().await {
            debug!(
                "[Controller] Discarded playback of {} at teardown.",
                track.track_id
            );
        }
        let mut discarded = 0;
        while self.frames_rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!("[Controller] Discarded {} unsent frames.", discarded);
        }
    }

    /// Disconnects if needed and clears the transcript, event log, memory and
    /// editor mirror.
    pub async fn reset(&mut self) {
        self.disconnect().await;
        self.clear_transient_state();
        info!("[Controller] Reset.");
    }

    /// No-op while disconnected. The item leaves the list once the remote
    /// confirms the deletion.
    pub async fn delete_item(&mut self, item_id: &str) -> Result<(), RealtimeError> {
        if !self.is_connected() {
            debug!("[Controller] Delete of {} ignored: not connected.", item_id);
            return Ok(());
        }
        self.remote.delete_item(item_id).await
    }

    pub fn set_editor_text(&mut self, text: impl Into<String>) {
        self.editor_text = text.into();
    }

    /// Sends the editor contents to the agent and asks for an assessment.
    pub async fn request_feedback(&mut self) -> Result<(), RealtimeError> {
        if !self.is_connected() {
            return Err(RealtimeError::NotConnected);
        }
        let body = if self.editor_text.trim().is_empty() {
            "(the editor is empty)".to_string()
        } else {
            self.editor_text.clone()
        };
        let message = format!(
            "Please give me feedback on what I have written in the editor so far, with a score from 1 to 10 and what to improve.\n\n{}",
            body
        );
        info!("[Controller] Feedback requested.");
        self.remote
            .send_user_message_content(vec![ContentPart::input_text(message)])
            .await?;
        if self.session.turn_mode == TurnMode::Manual {
            self.turn_state = TurnState::AwaitingResponse;
        }
        Ok(())
    }

    /// Handles one notification from the remote session.
    ///
    /// Never fails: problems are logged and the session carries on.
    pub async fn dispatch(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Realtime(event) => self.event_log.record(event),
            SessionEvent::ConversationUpdated { item_id, delta } => {
                let snapshot = self.remote.items();
                self.reconciler
                    .on_updated(&item_id, delta, &snapshot, &mut self.playback);
            }
            SessionEvent::ItemCompleted { item_id } => {
                let snapshot = self.remote.items();
                self.reconciler.on_completed(&item_id, &snapshot);
                let assistant_done = self
                    .reconciler
                    .get(&item_id)
                    .is_some_and(|item| item.role == crate::types::Role::Assistant);
                if assistant_done {
                    self.finish_response();
                }
            }
            SessionEvent::ResponseDone => self.finish_response(),
            SessionEvent::Interrupted => {
                debug!("[Controller] Remote reported user speech.");
                self.interrupt_playback().await;
            }
            SessionEvent::Error(message) => {
                warn!("[Controller] Remote error: {}", message);
            }
            SessionEvent::ProtocolError { message, raw } => {
                warn!("[Controller] Protocol error: {}", message);
                self.event_log.record_protocol_error(&message, &raw);
            }
            SessionEvent::Closed(reason) => {
                warn!("[Controller] Remote session closed: {:?}", reason);
                self.disconnect().await;
            }
        }
    }

    /// Services one command, frame or remote notification.
    ///
    /// Returns `Ok(false)` once the session is over.
    pub async fn step(&mut self) -> Result<bool, RealtimeError> {
        if !self.is_connected() {
            return Ok(false);
        }
        let input = tokio::select! {
            biased;
            Some(command) = self.commands_rx.recv() => Input::Command(command),
            Some(frame) = self.frames_rx.recv() => Input::Frame(frame),
            event = self.remote.next_event() => Input::Remote(event),
        };
        match input {
            Input::Command(command) => self.execute(command).await,
            Input::Frame(frame) => self.forward_frame(frame).await,
            Input::Remote(Some(event)) => self.dispatch(event).await,
            Input::Remote(None) => {
                warn!("[Controller] Remote event stream ended.");
                self.disconnect().await;
            }
        }
        Ok(self.is_connected())
    }

    /// Runs the dispatch loop until the session ends.
    pub async fn run(&mut self) -> Result<(), RealtimeError> {
        info!("[Controller] Dispatch loop started.");
        while self.step().await? {}
        info!("[Controller] Dispatch loop stopped.");
        Ok(())
    }

    async fn execute(&mut self, command: Command) {
        trace!("[Controller] Command {:?}.", command);
        match command {
            Command::StartRecording(reply) => {
                let _ = reply.send(self.start_recording().await);
            }
            Command::StopRecording(reply) => {
                let _ = reply.send(self.stop_recording().await);
            }
            Command::SetTurnMode(mode, reply) => {
                let _ = reply.send(self.set_turn_mode(mode).await);
            }
            Command::DeleteItem(item_id, reply) => {
                let _ = reply.send(self.delete_item(&item_id).await);
            }
            Command::SetEditorText(text) => self.set_editor_text(text),
            Command::RequestFeedback(reply) => {
                let _ = reply.send(self.request_feedback().await);
            }
            Command::Disconnect(reply) => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Command::Items(reply) => {
                let _ = reply.send(self.reconciler.items().to_vec());
            }
            Command::EventLog(reply) => {
                let _ = reply.send(self.event_log.entries().to_vec());
            }
            Command::Memory(reply) => {
                let _ = reply.send(self.memory.snapshot());
            }
            Command::Session(reply) => {
                let _ = reply.send(self.session.clone());
            }
            Command::TurnState(reply) => {
                let _ = reply.send(self.turn_state);
            }
        }
    }

    pub(super) async fn forward_frame(&mut self, frame: Vec<i16>) {
        if !self.remote.is_connected() {
            trace!("[Controller] Dropping frame: remote not connected.");
            return;
        }
        if let Err(e) = self.remote.append_input_audio(&frame).await {
            warn!("[Controller] Failed to forward {} samples: {}", frame.len(), e);
        }
    }

    /// Forwards frames still queued from capture, in order.
    pub(super) async fn forward_queued_frames(&mut self) {
        while let Ok(frame) = self.frames_rx.try_recv() {
            self.forward_frame(frame).await;
        }
    }

    fn finish_response(&mut self) {
        if self.turn_state == TurnState::AwaitingResponse {
            debug!("[Controller] Response finished, turn back to idle.");
            self.turn_state = TurnState::Idle;
        }
    }

    fn clear_transient_state(&mut self) {
        self.event_log.clear();
        self.reconciler.clear();
        self.memory.clear();
        self.editor_text.clear();
        self.turn_state = TurnState::Idle;
        while self.frames_rx.try_recv().is_ok() {}
    }

    async fn unwind_capture(&mut self) {
        if let Err(e) = self.capture.end().await {
            warn!("[Controller] Capture device did not close while unwinding: {}", e);
        }
    }
}
