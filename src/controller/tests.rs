use super::*;
use crate::audio::{AudioCapture, AudioPlayback, CaptureStatus, TrackOffset};
use crate::client::handle::test_utils::init_test_logger;
use crate::client::{ItemDelta, ItemSnapshot, ItemStatus, RemoteSession, SessionEvent, ToolHandler};
use crate::error::RealtimeError;
use crate::types::{
    ContentPart, EventSource, ItemType, RealtimeEvent, Role, SessionUpdate, ToolDefinition,
    TurnDetectionKind,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

struct Script {
    journal: Vec<String>,
    connected: bool,
    fail_capture_begin: bool,
    fail_playback_connect: bool,
    fail_remote_connect: bool,
    fail_cancel: bool,
    fail_send_message: bool,
    fail_update_session: bool,
    fail_record: bool,
    items: Vec<ItemSnapshot>,
    events: VecDeque<SessionEvent>,
    messages: Vec<String>,
    tools: Vec<(String, Arc<dyn ToolHandler>)>,
    turn_detection: Option<TurnDetectionKind>,
    capture_status: CaptureStatus,
    sink: Option<mpsc::Sender<Vec<i16>>>,
    playing: Option<TrackOffset>,
}

type Shared = Arc<Mutex<Script>>;

fn new_script() -> Shared {
    Arc::new(Mutex::new(Script {
        journal: Vec::new(),
        connected: false,
        fail_capture_begin: false,
        fail_playback_connect: false,
        fail_remote_connect: false,
        fail_cancel: false,
        fail_send_message: false,
        fail_update_session: false,
        fail_record: false,
        items: Vec::new(),
        events: VecDeque::new(),
        messages: Vec::new(),
        tools: Vec::new(),
        turn_detection: None,
        capture_status: CaptureStatus::Idle,
        sink: None,
        playing: None,
    }))
}

fn note(script: &Shared, entry: impl Into<String>) {
    script.lock().unwrap().journal.push(entry.into());
}

struct FakeRemote(Shared);
struct FakeCapture(Shared);
struct FakePlayback(Shared);

#[async_trait::async_trait]
impl RemoteSession for FakeRemote {
    async fn connect(&mut self) -> Result<(), RealtimeError> {
        note(&self.0, "remote.connect");
        let mut script = self.0.lock().unwrap();
        if script.fail_remote_connect {
            return Err(RealtimeError::Connection("refused".to_string()));
        }
        script.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        note(&self.0, "remote.disconnect");
        let mut script = self.0.lock().unwrap();
        script.connected = false;
        script.items.clear();
    }

    fn is_connected(&self) -> bool {
        self.0.lock().unwrap().connected
    }

    async fn next_event(&mut self) -> Option<SessionEvent> {
        let next = self.0.lock().unwrap().events.pop_front();
        match next {
            Some(event) => Some(event),
            None => std::future::pending().await,
        }
    }

    async fn update_session(&mut self, update: SessionUpdate) -> Result<(), RealtimeError> {
        note(&self.0, "remote.update_session");
        if self.0.lock().unwrap().fail_update_session {
            return Err(RealtimeError::SendError);
        }
        if let Some(turn_detection) = update.turn_detection {
            self.0.lock().unwrap().turn_detection = turn_detection.map(|t| t.kind);
        }
        Ok(())
    }

    fn turn_detection(&self) -> Option<TurnDetectionKind> {
        self.0.lock().unwrap().turn_detection
    }

    async fn add_tool(
        &mut self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RealtimeError> {
        note(&self.0, format!("remote.add_tool({})", definition.name));
        self.0.lock().unwrap().tools.push((definition.name, handler));
        Ok(())
    }

    async fn send_user_message_content(
        &mut self,
        content: Vec<ContentPart>,
    ) -> Result<(), RealtimeError> {
        note(&self.0, "remote.send_user_message");
        if self.0.lock().unwrap().fail_send_message {
            return Err(RealtimeError::SendError);
        }
        for part in content {
            if let ContentPart::InputText { text } = part {
                self.0.lock().unwrap().messages.push(text);
            }
        }
        Ok(())
    }

    async fn append_input_audio(&mut self, frame: &[i16]) -> Result<(), RealtimeError> {
        note(&self.0, format!("remote.append({})", frame.len()));
        Ok(())
    }

    async fn create_response(&mut self) -> Result<(), RealtimeError> {
        note(&self.0, "remote.create_response");
        Ok(())
    }

    async fn cancel_response(
        &mut self,
        item_id: &str,
        played: Duration,
    ) -> Result<(), RealtimeError> {
        note(
            &self.0,
            format!("remote.cancel_response({}, {}ms)", item_id, played.as_millis()),
        );
        if self.0.lock().unwrap().fail_cancel {
            return Err(RealtimeError::Cancellation("already completed".to_string()));
        }
        Ok(())
    }

    async fn delete_item(&mut self, item_id: &str) -> Result<(), RealtimeError> {
        note(&self.0, format!("remote.delete_item({})", item_id));
        Ok(())
    }

    fn items(&self) -> Vec<ItemSnapshot> {
        self.0.lock().unwrap().items.clone()
    }
}

#[async_trait::async_trait]
impl AudioCapture for FakeCapture {
    async fn begin(&mut self) -> Result<(), RealtimeError> {
        note(&self.0, "capture.begin");
        let mut script = self.0.lock().unwrap();
        if script.fail_capture_begin {
            return Err(RealtimeError::Capture("no microphone".to_string()));
        }
        script.capture_status = CaptureStatus::Paused;
        Ok(())
    }

    async fn record(&mut self, frames: mpsc::Sender<Vec<i16>>) -> Result<(), RealtimeError> {
        note(&self.0, "capture.record");
        let mut script = self.0.lock().unwrap();
        if script.fail_record {
            return Err(RealtimeError::Capture("stream stalled".to_string()));
        }
        script.sink = Some(frames);
        script.capture_status = CaptureStatus::Recording;
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), RealtimeError> {
        note(&self.0, "capture.pause");
        let mut script = self.0.lock().unwrap();
        script.sink = None;
        script.capture_status = CaptureStatus::Paused;
        Ok(())
    }

    async fn end(&mut self) -> Result<(), RealtimeError> {
        note(&self.0, "capture.end");
        let mut script = self.0.lock().unwrap();
        script.sink = None;
        script.capture_status = CaptureStatus::Idle;
        Ok(())
    }

    fn status(&self) -> CaptureStatus {
        self.0.lock().unwrap().capture_status
    }
}

#[async_trait::async_trait]
impl AudioPlayback for FakePlayback {
    async fn connect(&mut self) -> Result<(), RealtimeError> {
        note(&self.0, "playback.connect");
        if self.0.lock().unwrap().fail_playback_connect {
            return Err(RealtimeError::Playback("no output device".to_string()));
        }
        Ok(())
    }

    fn add_16bit_pcm(&mut self, pcm: &[u8], track_id: &str) {
        note(&self.0, format!("playback.add({}, {})", track_id, pcm.len()));
    }

    async fn interrupt(&mut self) -> Option<TrackOffset> {
        note(&self.0, "playback.interrupt");
        self.0.lock().unwrap().playing.take()
    }
}

type TestController = SessionController<FakeRemote, FakeCapture, FakePlayback>;

async fn controller(mode: TurnMode) -> (TestController, Shared) {
    init_test_logger();
    let script = new_script();
    let config = ControllerConfig {
        turn_mode: mode,
        ..Default::default()
    };
    let controller = SessionController::new(
        FakeRemote(script.clone()),
        FakeCapture(script.clone()),
        FakePlayback(script.clone()),
        config,
    )
    .await
    .unwrap();
    (controller, script)
}

fn brief() -> InterviewBrief {
    InterviewBrief {
        role: "Backend engineer".to_string(),
        company: "Acme".to_string(),
        custom_prompt: String::new(),
    }
}

async fn connected(mode: TurnMode) -> (TestController, Shared) {
    let (mut controller, script) = controller(mode).await;
    controller.connect(&brief()).await.unwrap();
    script.lock().unwrap().journal.clear();
    (controller, script)
}

fn journal(script: &Shared) -> Vec<String> {
    script.lock().unwrap().journal.clone()
}

fn count(script: &Shared, entry: &str) -> usize {
    journal(script).iter().filter(|e| e.as_str() == entry).count()
}

fn emit_frame(script: &Shared, len: usize) {
    let sink = script.lock().unwrap().sink.clone().expect("capture is not recording");
    sink.try_send(vec![0; len]).unwrap();
}

fn assistant(id: &str, status: ItemStatus) -> ItemSnapshot {
    let mut item = ItemSnapshot::new(id, ItemType::Message, Role::Assistant);
    item.status = status;
    item.audio_index = Some(0);
    item
}

#[tokio::test]
async fn test_construction_registers_memory_tool_and_mode() {
    let (controller, script) = controller(TurnMode::ServerVad).await;
    assert_eq!(
        journal(&script),
        ["remote.add_tool(set_memory)", "remote.update_session"]
    );
    assert_eq!(
        script.lock().unwrap().turn_detection,
        Some(TurnDetectionKind::ServerVad)
    );
    assert_eq!(controller.session().status, SessionStatus::Disconnected);
}

#[tokio::test]
async fn test_connect_opens_everything_and_seeds_once() {
    let (mut controller, script) = controller(TurnMode::Manual).await;
    script.lock().unwrap().journal.clear();
    controller.connect(&brief()).await.unwrap();

    assert_eq!(
        journal(&script),
        [
            "capture.begin",
            "playback.connect",
            "remote.connect",
            "remote.send_user_message"
        ]
    );
    let messages = script.lock().unwrap().messages.clone();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("Backend engineer"));
    assert!(messages[0].contains("Acme"));
    assert_eq!(controller.session().status, SessionStatus::Connected);
    assert!(controller.session().start_time.is_some());
    assert_eq!(controller.turn_state(), TurnState::Idle);

    assert!(matches!(
        controller.connect(&brief()).await,
        Err(RealtimeError::AlreadyConnected)
    ));
}

#[tokio::test]
async fn test_connect_in_vad_mode_starts_capture() {
    let (mut controller, script) = controller(TurnMode::ServerVad).await;
    controller.connect(&brief()).await.unwrap();
    assert_eq!(journal(&script).last().map(String::as_str), Some("capture.record"));
    assert_eq!(script.lock().unwrap().capture_status, CaptureStatus::Recording);
}

#[tokio::test]
async fn test_connect_failure_unwinds_opened_resources() {
    let (mut controller, script) = controller(TurnMode::ServerVad).await;
    script.lock().unwrap().fail_remote_connect = true;
    script.lock().unwrap().journal.clear();

    let result = controller.connect(&brief()).await;
    assert!(matches!(result, Err(RealtimeError::Connection(_))));
    assert_eq!(
        journal(&script),
        [
            "capture.begin",
            "playback.connect",
            "remote.connect",
            "playback.interrupt",
            "capture.end"
        ]
    );
    assert_eq!(controller.session().status, SessionStatus::Disconnected);
    assert!(script.lock().unwrap().messages.is_empty());

    script.lock().unwrap().fail_remote_connect = false;
    controller.connect(&brief()).await.unwrap();
    assert!(controller.is_connected());
}

#[tokio::test]
async fn test_playback_failure_skips_remote() {
    let (mut controller, script) = controller(TurnMode::Manual).await;
    script.lock().unwrap().fail_playback_connect = true;
    script.lock().unwrap().journal.clear();

    assert!(matches!(
        controller.connect(&brief()).await,
        Err(RealtimeError::Connection(msg)) if msg.contains("playback")
    ));
    assert_eq!(
        journal(&script),
        ["capture.begin", "playback.connect", "capture.end"]
    );
}

#[tokio::test]
async fn test_capture_failure_is_connection_error() {
    let (mut controller, script) = controller(TurnMode::Manual).await;
    script.lock().unwrap().fail_capture_begin = true;
    assert!(matches!(
        controller.connect(&brief()).await,
        Err(RealtimeError::Connection(_))
    ));
    assert!(!script.lock().unwrap().connected);
}

#[tokio::test]
async fn test_seed_failure_tears_session_down() {
    let (mut controller, script) = controller(TurnMode::Manual).await;
    script.lock().unwrap().fail_send_message = true;
    script.lock().unwrap().journal.clear();

    assert!(matches!(
        controller.connect(&brief()).await,
        Err(RealtimeError::Connection(msg)) if msg.contains("seed")
    ));
    assert_eq!(
        journal(&script),
        [
            "capture.begin",
            "playback.connect",
            "remote.connect",
            "remote.send_user_message",
            "remote.disconnect",
            "capture.end",
            "playback.interrupt"
        ]
    );
    assert_eq!(controller.session().status, SessionStatus::Disconnected);
    assert!(!script.lock().unwrap().connected);
    assert_eq!(script.lock().unwrap().capture_status, CaptureStatus::Idle);
}

#[tokio::test]
async fn test_continuous_capture_failure_tears_session_down() {
    let (mut controller, script) = controller(TurnMode::ServerVad).await;
    script.lock().unwrap().fail_record = true;
    script.lock().unwrap().journal.clear();

    assert!(matches!(
        controller.connect(&brief()).await,
        Err(RealtimeError::Connection(msg)) if msg.contains("capture")
    ));
    assert_eq!(
        journal(&script),
        [
            "capture.begin",
            "playback.connect",
            "remote.connect",
            "remote.send_user_message",
            "capture.record",
            "remote.disconnect",
            "capture.end",
            "playback.interrupt"
        ]
    );
    assert_eq!(controller.session().status, SessionStatus::Disconnected);
    assert!(controller.items().is_empty());

    script.lock().unwrap().fail_record = false;
    controller.connect(&brief()).await.unwrap();
    assert_eq!(script.lock().unwrap().capture_status, CaptureStatus::Recording);
}

#[tokio::test]
async fn test_disconnect_keeps_transcript_and_is_safe_twice() {
    let (mut controller, script) = connected(TurnMode::Manual).await;
    script.lock().unwrap().items = vec![assistant("a1", ItemStatus::Completed)];
    controller
        .dispatch(SessionEvent::ConversationUpdated {
            item_id: "a1".to_string(),
            delta: None,
        })
        .await;

    controller.disconnect().await;
    assert_eq!(
        journal(&script),
        ["remote.disconnect", "capture.end", "playback.interrupt"]
    );
    assert_eq!(controller.items().len(), 1);
    assert_eq!(controller.session().status, SessionStatus::Disconnected);

    controller.disconnect().await;
    assert_eq!(journal(&script).len(), 3);

    controller.reset().await;
    assert!(controller.items().is_empty());
    assert!(controller.event_log().is_empty());
}

#[tokio::test]
async fn test_delete_item_only_when_connected() {
    let (mut controller, script) = controller(TurnMode::Manual).await;
    script.lock().unwrap().journal.clear();
    controller.delete_item("a1").await.unwrap();
    assert!(journal(&script).is_empty());

    controller.connect(&brief()).await.unwrap();
    controller.delete_item("a1").await.unwrap();
    assert_eq!(
        journal(&script).last().map(String::as_str),
        Some("remote.delete_item(a1)")
    );
}

#[tokio::test]
async fn test_start_recording_without_playback_issues_no_cancel() {
    let (mut controller, script) = connected(TurnMode::Manual).await;
    controller.start_recording().await.unwrap();
    assert_eq!(journal(&script), ["playback.interrupt", "capture.record"]);
    assert_eq!(controller.turn_state(), TurnState::Capturing);
}

#[tokio::test]
async fn test_start_recording_interrupts_before_forwarding() {
    let (mut controller, script) = connected(TurnMode::Manual).await;
    script.lock().unwrap().playing = Some(TrackOffset {
        track_id: "a1".to_string(),
        samples_played: 36000,
    });

    controller.start_recording().await.unwrap();
    emit_frame(&script, 4800);
    assert!(controller.step().await.unwrap());

    assert_eq!(
        journal(&script),
        [
            "playback.interrupt",
            "remote.cancel_response(a1, 1500ms)",
            "capture.record",
            "remote.append(4800)"
        ]
    );
}

#[tokio::test]
async fn test_rejected_cancellation_is_swallowed() {
    let (mut controller, script) = connected(TurnMode::Manual).await;
    {
        let mut s = script.lock().unwrap();
        s.fail_cancel = true;
        s.playing = Some(TrackOffset {
            track_id: "a1".to_string(),
            samples_played: 100,
        });
    }
    controller.start_recording().await.unwrap();
    assert_eq!(controller.turn_state(), TurnState::Capturing);
    assert_eq!(count(&script, "remote.cancel_response(a1, 4ms)"), 1);
}

#[tokio::test]
async fn test_manual_turn_requests_exactly_one_response() {
    let (mut controller, script) = connected(TurnMode::Manual).await;
    assert_eq!(controller.turn_state(), TurnState::Idle);

    controller.start_recording().await.unwrap();
    assert_eq!(controller.turn_state(), TurnState::Capturing);
    emit_frame(&script, 4800);
    emit_frame(&script, 1200);

    controller.stop_recording().await.unwrap();
    assert_eq!(controller.turn_state(), TurnState::AwaitingResponse);
    assert_eq!(count(&script, "remote.create_response"), 1);

    let tail: Vec<_> = journal(&script).into_iter().skip(2).collect();
    assert_eq!(
        tail,
        [
            "capture.pause",
            "remote.append(4800)",
            "remote.append(1200)",
            "remote.create_response"
        ]
    );

    controller.stop_recording().await.unwrap();
    assert_eq!(count(&script, "remote.create_response"), 1);

    controller.dispatch(SessionEvent::ResponseDone).await;
    assert_eq!(controller.turn_state(), TurnState::Idle);
}

#[tokio::test]
async fn test_assistant_completion_ends_awaiting_response() {
    let (mut controller, script) = connected(TurnMode::Manual).await;
    controller.start_recording().await.unwrap();
    controller.stop_recording().await.unwrap();

    script.lock().unwrap().items = vec![assistant("a1", ItemStatus::Completed)];
    controller
        .dispatch(SessionEvent::ItemCompleted {
            item_id: "a1".to_string(),
        })
        .await;
    assert_eq!(controller.turn_state(), TurnState::Idle);
}

#[tokio::test]
async fn test_switch_vad_to_manual_pauses_once() {
    let (mut controller, script) = connected(TurnMode::ServerVad).await;
    controller.set_turn_mode(TurnMode::Manual).await.unwrap();

    assert_eq!(count(&script, "capture.pause"), 1);
    assert_eq!(count(&script, "remote.create_response"), 0);
    assert_eq!(script.lock().unwrap().turn_detection, None);
    assert_eq!(controller.turn_mode(), TurnMode::Manual);

    controller.set_turn_mode(TurnMode::Manual).await.unwrap();
    assert_eq!(count(&script, "capture.pause"), 1);
}

#[tokio::test]
async fn test_failed_mode_switch_keeps_capture_running() {
    let (mut controller, script) = connected(TurnMode::ServerVad).await;
    script.lock().unwrap().fail_update_session = true;

    assert!(controller.set_turn_mode(TurnMode::Manual).await.is_err());
    assert_eq!(
        journal(&script),
        ["capture.pause", "remote.update_session", "capture.record"]
    );
    assert_eq!(controller.turn_mode(), TurnMode::ServerVad);
    assert_eq!(script.lock().unwrap().capture_status, CaptureStatus::Recording);
    assert_eq!(
        script.lock().unwrap().turn_detection,
        Some(TurnDetectionKind::ServerVad)
    );

    emit_frame(&script, 4800);
    controller.step().await.unwrap();
    assert_eq!(count(&script, "remote.append(4800)"), 1);
}

#[tokio::test]
async fn test_failed_mode_switch_keeps_manual_turn() {
    let (mut controller, script) = connected(TurnMode::Manual).await;
    controller.start_recording().await.unwrap();
    script.lock().unwrap().fail_update_session = true;

    assert!(controller.set_turn_mode(TurnMode::ServerVad).await.is_err());
    assert_eq!(controller.turn_state(), TurnState::Capturing);
    assert_eq!(controller.turn_mode(), TurnMode::Manual);

    script.lock().unwrap().fail_update_session = false;
    controller.stop_recording().await.unwrap();
    assert_eq!(count(&script, "remote.create_response"), 1);
}

#[tokio::test]
async fn test_switch_to_vad_restarts_capture() {
    let (mut controller, script) = connected(TurnMode::Manual).await;
    controller.set_turn_mode(TurnMode::ServerVad).await.unwrap();
    assert_eq!(journal(&script), ["remote.update_session", "capture.record"]);

    controller.start_recording().await.unwrap();
    assert_eq!(count(&script, "capture.record"), 1);
}

#[tokio::test]
async fn test_mode_switch_keeps_items() {
    let (mut controller, script) = connected(TurnMode::ServerVad).await;
    script.lock().unwrap().items = vec![assistant("a1", ItemStatus::InProgress)];
    controller
        .dispatch(SessionEvent::ConversationUpdated {
            item_id: "a1".to_string(),
            delta: Some(ItemDelta::Audio(vec![0; 10])),
        })
        .await;
    controller.set_turn_mode(TurnMode::Manual).await.unwrap();
    assert_eq!(controller.items()[0].audio.len(), 10);
}

#[tokio::test]
async fn test_remote_interruption_cancels_active_track() {
    let (mut controller, script) = connected(TurnMode::ServerVad).await;
    script.lock().unwrap().events.push_back(SessionEvent::Interrupted);
    controller.step().await.unwrap();
    assert_eq!(journal(&script), ["playback.interrupt"]);

    script.lock().unwrap().playing = Some(TrackOffset {
        track_id: "a2".to_string(),
        samples_played: 12000,
    });
    script.lock().unwrap().events.push_back(SessionEvent::Interrupted);
    controller.step().await.unwrap();
    assert_eq!(count(&script, "remote.cancel_response(a2, 500ms)"), 1);
}

#[tokio::test]
async fn test_streamed_item_decodes_once_end_to_end() {
    let (mut controller, script) = controller(TurnMode::Manual).await;
    controller.connect(&brief()).await.unwrap();
    assert_eq!(count(&script, "remote.send_user_message"), 1);

    script.lock().unwrap().items = vec![assistant("a1", ItemStatus::InProgress)];
    for len in [100, 150, 200] {
        script
            .lock()
            .unwrap()
            .events
            .push_back(SessionEvent::ConversationUpdated {
                item_id: "a1".to_string(),
                delta: Some(ItemDelta::Audio(vec![0; len])),
            });
    }
    for _ in 0..3 {
        controller.step().await.unwrap();
    }
    assert_eq!(count(&script, "playback.add(a1, 150)"), 1);

    script.lock().unwrap().items = vec![assistant("a1", ItemStatus::Completed)];
    for _ in 0..2 {
        controller
            .dispatch(SessionEvent::ItemCompleted {
                item_id: "a1".to_string(),
            })
            .await;
    }

    assert_eq!(controller.decode_count(), 1);
    assert_eq!(controller.items().len(), 1);
    let item = &controller.items()[0];
    assert_eq!(item.status, ItemStatus::Completed);
    assert_eq!(item.audio.len(), 450);
    assert_eq!(item.asset.as_ref().unwrap().pcm_len, 450);
}

#[tokio::test]
async fn test_event_log_collapses_and_records_protocol_errors() {
    let (mut controller, _script) = connected(TurnMode::Manual).await;
    for _ in 0..3 {
        controller
            .dispatch(SessionEvent::Realtime(RealtimeEvent::new(
                EventSource::Server,
                "response.audio.delta",
                json!({}),
            )))
            .await;
    }
    controller
        .dispatch(SessionEvent::ProtocolError {
            message: "Invalid JSON".to_string(),
            raw: "{".to_string(),
        })
        .await;

    let entries = controller.event_log().entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].repeat_count, 3);
    assert_eq!(entries[1].type_name, event_log::PROTOCOL_ERROR_TYPE);
    assert!(controller.is_connected());
}

#[tokio::test]
async fn test_remote_close_tears_down() {
    let (mut controller, script) = connected(TurnMode::ServerVad).await;
    script
        .lock()
        .unwrap()
        .events
        .push_back(SessionEvent::Closed(Some("server shutdown".to_string())));
    assert!(!controller.step().await.unwrap());
    assert_eq!(controller.session().status, SessionStatus::Disconnected);
    assert_eq!(count(&script, "capture.end"), 1);
}

#[tokio::test]
async fn test_memory_tool_and_reset_on_connect() {
    let (mut controller, script) = connected(TurnMode::Manual).await;
    let handler = script.lock().unwrap().tools[0].1.clone();
    handler
        .call(json!({ "key": "years_experience", "value": "7" }))
        .await
        .unwrap();
    assert_eq!(
        controller.memory().get("years_experience").as_deref(),
        Some("7")
    );

    controller.disconnect().await;
    assert_eq!(controller.memory().snapshot().len(), 1);
    controller.connect(&brief()).await.unwrap();
    assert!(controller.memory().snapshot().is_empty());
}

#[tokio::test]
async fn test_feedback_sends_editor_mirror() {
    let (mut controller, script) = controller(TurnMode::Manual).await;
    assert!(matches!(
        controller.request_feedback().await,
        Err(RealtimeError::NotConnected)
    ));

    controller.connect(&brief()).await.unwrap();
    controller.set_editor_text("fn main() {}");
    controller.request_feedback().await.unwrap();
    controller.request_feedback().await.unwrap();

    let messages = script.lock().unwrap().messages.clone();
    assert_eq!(messages.len(), 3);
    assert!(messages[1].ends_with("fn main() {}"));
    assert_eq!(messages[1], messages[2]);
    assert_eq!(controller.turn_state(), TurnState::AwaitingResponse);
}

#[tokio::test]
async fn test_handle_drives_running_controller() {
    let (mut controller, _script) = connected(TurnMode::Manual).await;
    let handle = controller.handle();

    let operator = tokio::spawn(async move {
        handle.set_editor_text("draft").await.unwrap();
        let before = handle.turn_state().await.unwrap();
        handle.start_recording().await.unwrap();
        let during = handle.turn_state().await.unwrap();
        let session = handle.session().await.unwrap();
        handle.disconnect().await.unwrap();
        (before, during, session.status)
    });

    controller.run().await.unwrap();
    let (before, during, status) = operator.await.unwrap();
    assert_eq!(before, TurnState::Idle);
    assert_eq!(during, TurnState::Capturing);
    assert_eq!(status, SessionStatus::Connected);
    assert_eq!(controller.editor_text(), "draft");
    assert!(!controller.is_connected());
}
