use super::event_log::RealtimeEventLogEntry;
use super::reconciler::ConversationItem;
use super::session::Session;
use super::turn::{TurnMode, TurnState};
use crate::error::RealtimeError;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};
use tracing::error;

type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
pub(crate) enum Command {
    StartRecording(Reply<Result<(), RealtimeError>>),
    StopRecording(Reply<Result<(), RealtimeError>>),
    SetTurnMode(TurnMode, Reply<Result<(), RealtimeError>>),
    DeleteItem(String, Reply<Result<(), RealtimeError>>),
    SetEditorText(String),
    RequestFeedback(Reply<Result<(), RealtimeError>>),
    Disconnect(Reply<()>),
    Items(Reply<Vec<ConversationItem>>),
    EventLog(Reply<Vec<RealtimeEventLogEntry>>),
    Memory(Reply<BTreeMap<String, String>>),
    Session(Reply<Session>),
    TurnState(Reply<TurnState>),
}

/// Cloneable operator-side handle to a running [`super::SessionController`].
///
/// Every call is queued to the dispatch loop and answered once the controller
/// has handled it, so operator actions interleave with remote notifications in
/// a single order.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
}

impl ControllerHandle {
    pub(crate) fn new(commands: mpsc::Sender<Command>) -> Self {
        Self { commands }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, RealtimeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(make(reply_tx)).await.is_err() {
            error!("[ControllerHandle] Controller is gone, command dropped.");
            return Err(RealtimeError::ControllerClosed);
        }
        reply_rx.await.map_err(|_| RealtimeError::ControllerClosed)
    }

    pub async fn start_recording(&self) -> Result<(), RealtimeError> {
        self.request(Command::StartRecording).await?
    }

    pub async fn stop_recording(&self) -> Result<(), RealtimeError> {
        self.request(Command::StopRecording).await?
    }

    pub async fn set_turn_mode(&self, mode: TurnMode) -> Result<(), RealtimeError> {
        self.request(|reply| Command::SetTurnMode(mode, reply))
            .await?
    }

    pub async fn delete_item(&self, item_id: impl Into<String>) -> Result<(), RealtimeError> {
        let item_id = item_id.into();
        self.request(|reply| Command::DeleteItem(item_id, reply))
            .await?
    }

    pub async fn set_editor_text(&self, text: impl Into<String>) -> Result<(), RealtimeError> {
        self.commands
            .send(Command::SetEditorText(text.into()))
            .await
            .map_err(|_| RealtimeError::ControllerClosed)
    }

    pub async fn request_feedback(&self) -> Result<(), RealtimeError> {
        self.request(Command::RequestFeedback).await?
    }

    pub async fn disconnect(&self) -> Result<(), RealtimeError> {
        self.request(Command::Disconnect).await
    }

    pub async fn items(&self) -> Result<Vec<ConversationItem>, RealtimeError> {
        self.request(Command::Items).await
    }

    pub async fn event_log(&self) -> Result<Vec<RealtimeEventLogEntry>, RealtimeError> {
        self.request(Command::EventLog).await
    }

    pub async fn memory(&self) -> Result<BTreeMap<String, String>, RealtimeError> {
        self.request(Command::Memory).await
    }

    pub async fn session(&self) -> Result<Session, RealtimeError> {
        self.request(Command::Session).await
    }

    pub async fn turn_state(&self) -> Result<TurnState, RealtimeError> {
        self.request(Command::TurnState).await
    }
}
