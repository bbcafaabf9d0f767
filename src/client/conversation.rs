use super::session::{ItemDelta, SessionEvent};
use crate::SAMPLE_RATE_HZ;
use crate::error::RealtimeError;
use crate::types::{ContentPart, Item, ItemType, Role, ServerEvent, WireItemStatus};
use base64::Engine as _;
use std::collections::HashMap;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemStatus {
    #[default]
    InProgress,
    Completed,
}

impl From<Option<WireItemStatus>> for ItemStatus {
    fn from(status: Option<WireItemStatus>) -> Self {
        match status {
            Some(WireItemStatus::Completed) | Some(WireItemStatus::Incomplete) => {
                ItemStatus::Completed
            }
            Some(WireItemStatus::InProgress) | None => ItemStatus::InProgress,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolCall {
    pub name: String,
    pub call_id: String,
    pub arguments: String,
}

/// The session client's view of one conversation item.
///
/// Audio is not kept here; it is handed out as [`ItemDelta`]s so the consumer
/// owns the buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSnapshot {
    pub id: String,
    pub kind: ItemType,
    pub role: Role,
    pub status: ItemStatus,
    pub text: String,
    pub transcript: String,
    /// Content index of the audio part, if the item has one.
    pub audio_index: Option<u32>,
    pub tool_call: Option<ToolCall>,
    pub output: Option<String>,
}

impl ItemSnapshot {
    pub fn new(id: impl Into<String>, kind: ItemType, role: Role) -> Self {
        Self {
            id: id.into(),
            kind,
            role,
            status: ItemStatus::InProgress,
            text: String::new(),
            transcript: String::new(),
            audio_index: None,
            tool_call: None,
            output: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ItemStatus::Completed
    }

    pub fn is_assistant_message(&self) -> bool {
        self.kind == ItemType::Message && self.role == Role::Assistant
    }

    fn from_wire(id: String, item: &Item) -> Self {
        let role = match (item.kind, item.role) {
            (ItemType::Message, Some(role)) => role,
            (ItemType::Message, None) => Role::Assistant,
            _ => Role::Tool,
        };
        let mut snapshot = Self::new(id, item.kind, role);

        snapshot.status = match item.kind {
            ItemType::FunctionCallOutput => ItemStatus::Completed,
            ItemType::Message if role == Role::User => ItemStatus::Completed,
            _ => item.status.into(),
        };
        for (index, part) in item.content.iter().enumerate() {
            match part {
                ContentPart::InputText { text } | ContentPart::Text { text } => {
                    snapshot.text.push_str(text)
                }
                ContentPart::InputAudio { transcript, .. } | ContentPart::Audio { transcript, .. } => {
                    if snapshot.audio_index.is_none() {
                        snapshot.audio_index = Some(index as u32);
                    }
                    if let Some(transcript) = transcript {
                        snapshot.transcript.push_str(transcript);
                    }
                }
                ContentPart::Unknown => {}
            }
        }
        if item.kind == ItemType::FunctionCall {
            snapshot.tool_call = Some(ToolCall {
                name: item.name.clone().unwrap_or_default(),
                call_id: item.call_id.clone().unwrap_or_default(),
                arguments: item.arguments.clone().unwrap_or_default(),
            });
        }
        snapshot.output = item.output.clone();
        snapshot
    }

    fn has_input_audio(item: &Item) -> bool {
        item.content
            .iter()
            .any(|part| matches!(part, ContentPart::InputAudio { .. }))
    }
}

/// User speech detected by the server, waiting for its item to be created.
#[derive(Debug, Default)]
struct SpeechSpan {
    start_ms: u64,
    audio: Option<Vec<i16>>,
}

/// Saturates instead of overflowing on out-of-range server timestamps.
fn ms_to_sample(ms: u64) -> usize {
    let samples = ms.saturating_mul(SAMPLE_RATE_HZ as u64) / 1000;
    usize::try_from(samples).unwrap_or(usize::MAX)
}

/// Input audio appended during the session, addressed by absolute sample
/// position so older samples can be dropped without shifting speech spans.
#[derive(Debug, Default)]
pub(crate) struct InputAudio {
    samples: Vec<i16>,
    /// Absolute position of `samples[0]`.
    base: usize,
}

impl InputAudio {
    pub(crate) fn extend(&mut self, frame: &[i16]) {
        self.samples.extend_from_slice(frame);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples currently buffered.
    pub(crate) fn len(&self) -> usize {
        self.samples.len()
    }

    /// Absolute position one past the last appended sample.
    pub(crate) fn end(&self) -> usize {
        self.base + self.samples.len()
    }

    /// Forgets everything, including the position count. For a new session.
    pub(crate) fn clear(&mut self) {
        self.samples.clear();
        self.base = 0;
    }

    /// Hands out the buffered samples; positions keep counting from the end.
    pub(crate) fn take(&mut self) -> Vec<i16> {
        self.base += self.samples.len();
        std::mem::take(&mut self.samples)
    }

    /// Copies `[start, end)`, clamped to what is still buffered.
    pub(crate) fn span(&self, start: usize, end: usize) -> Vec<i16> {
        let start = start.clamp(self.base, self.end()) - self.base;
        let end = end.clamp(self.base, self.end()) - self.base;
        self.samples[start..end.max(start)].to_vec()
    }

    pub(crate) fn discard_before(&mut self, position: usize) {
        let count = position.saturating_sub(self.base).min(self.samples.len());
        if count > 0 {
            self.samples.drain(..count);
            self.base += count;
        }
    }
}

/// Ordered conversation state built from server events.
#[derive(Debug, Default)]
pub(crate) struct Conversation {
    items: Vec<ItemSnapshot>,
    queued_speech: HashMap<String, SpeechSpan>,
    queued_transcripts: HashMap<String, String>,
    queued_input_audio: Option<Vec<i16>>,
}

impl Conversation {
    pub(crate) fn items(&self) -> &[ItemSnapshot] {
        &self.items
    }

    pub(crate) fn get(&self, item_id: &str) -> Option<&ItemSnapshot> {
        self.items.iter().find(|item| item.id == item_id)
    }

    fn get_mut(&mut self, item_id: &str) -> Result<&mut ItemSnapshot, RealtimeError> {
        self.items
            .iter_mut()
            .find(|item| item.id == item_id)
            .ok_or_else(|| RealtimeError::Protocol(format!("Item \"{}\" not found", item_id)))
    }

    pub(crate) fn clear(&mut self) {
        self.items.clear();
        self.queued_speech.clear();
        self.queued_transcripts.clear();
        self.queued_input_audio = None;
    }

    /// Earliest input sample a started but not yet stopped speech span needs.
    pub(crate) fn open_speech_start(&self) -> Option<usize> {
        self.queued_speech
            .values()
            .filter(|span| span.audio.is_none())
            .map(|span| ms_to_sample(span.start_ms))
            .min()
    }

    /// Audio committed in manual mode, attached to the next user audio item.
    pub(crate) fn queue_input_audio(&mut self, samples: Vec<i16>) {
        self.queued_input_audio = Some(samples);
    }

    /// Applies one server event and returns the notifications it produces.
    ///
    /// `input_audio` is the retained input buffer, used to cut out speech
    /// spans reported by server-side voice detection.
    pub(crate) fn process(
        &mut self,
        event: &ServerEvent,
        input_audio: &InputAudio,
    ) -> Result<Vec<SessionEvent>, RealtimeError> {
        match event {
            ServerEvent::ConversationItemCreated { item } | ServerEvent::OutputItemAdded { item } => {
                self.add_item(item)
            }
            ServerEvent::OutputItemDone { item } => self.finish_item(item),
            ServerEvent::ConversationItemTruncated {
                item_id,
                audio_end_ms,
                ..
            } => {
                let entry = self.get_mut(item_id)?;
                entry.transcript.clear();
                Ok(vec![SessionEvent::ConversationUpdated {
                    item_id: item_id.clone(),
                    delta: Some(ItemDelta::Truncated {
                        audio_end_ms: *audio_end_ms,
                    }),
                }])
            }
            ServerEvent::ConversationItemDeleted { item_id } => {
                let index = self
                    .items
                    .iter()
                    .position(|item| &item.id == item_id)
                    .ok_or_else(|| {
                        RealtimeError::Protocol(format!("Item \"{}\" not found", item_id))
                    })?;
                self.items.remove(index);
                Ok(vec![SessionEvent::ConversationUpdated {
                    item_id: item_id.clone(),
                    delta: Some(ItemDelta::Removed),
                }])
            }
            ServerEvent::InputAudioTranscriptionCompleted {
                item_id,
                transcript,
                ..
            } => match self.items.iter_mut().find(|item| &item.id == item_id) {
                Some(entry) => {
                    entry.transcript = transcript.clone();
                    Ok(vec![SessionEvent::ConversationUpdated {
                        item_id: item_id.clone(),
                        delta: Some(ItemDelta::Transcript(transcript.clone())),
                    }])
                }
                None => {
                    trace!("[Conversation] Queued transcript for pending item {}.", item_id);
                    self.queued_transcripts
                        .insert(item_id.clone(), transcript.clone());
                    Ok(Vec::new())
                }
            },
            ServerEvent::SpeechStarted {
                item_id,
                audio_start_ms,
            } => {
                self.queued_speech.insert(
                    item_id.clone(),
                    SpeechSpan {
                        start_ms: *audio_start_ms,
                        audio: None,
                    },
                );
                Ok(vec![SessionEvent::Interrupted])
            }
            ServerEvent::SpeechStopped {
                item_id,
                audio_end_ms,
            } => {
                let span = self.queued_speech.entry(item_id.clone()).or_default();
                span.audio = Some(
                    input_audio.span(ms_to_sample(span.start_ms), ms_to_sample(*audio_end_ms)),
                );
                Ok(Vec::new())
            }
            ServerEvent::ContentPartAdded {
                item_id,
                content_index,
                part,
            } => {
                let entry = self.get_mut(item_id)?;
                match part {
                    ContentPart::Audio { transcript, .. } => {
                        entry.audio_index.get_or_insert(*content_index);
                        if let Some(transcript) = transcript {
                            entry.transcript.push_str(transcript);
                        }
                    }
                    ContentPart::Text { text } => entry.text.push_str(text),
                    _ => {}
                }
                Ok(vec![SessionEvent::ConversationUpdated {
                    item_id: item_id.clone(),
                    delta: None,
                }])
            }
            ServerEvent::AudioTranscriptDelta { item_id, delta } => {
                self.get_mut(item_id)?.transcript.push_str(delta);
                Ok(vec![SessionEvent::ConversationUpdated {
                    item_id: item_id.clone(),
                    delta: Some(ItemDelta::Transcript(delta.clone())),
                }])
            }
            ServerEvent::AudioDelta {
                item_id,
                content_index,
                delta,
            } => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(delta)
                    .map_err(|e| RealtimeError::Protocol(format!("Invalid audio delta: {}", e)))?;
                self.get_mut(item_id)?
                    .audio_index
                    .get_or_insert(*content_index);
                Ok(vec![SessionEvent::ConversationUpdated {
                    item_id: item_id.clone(),
                    delta: Some(ItemDelta::Audio(bytes)),
                }])
            }
            ServerEvent::TextDelta { item_id, delta } => {
                self.get_mut(item_id)?.text.push_str(delta);
                Ok(vec![SessionEvent::ConversationUpdated {
                    item_id: item_id.clone(),
                    delta: Some(ItemDelta::Text(delta.clone())),
                }])
            }
            ServerEvent::FunctionCallArgumentsDelta { item_id, delta } => {
                let entry = self.get_mut(item_id)?;
                entry
                    .tool_call
                    .get_or_insert_with(ToolCall::default)
                    .arguments
                    .push_str(delta);
                Ok(vec![SessionEvent::ConversationUpdated {
                    item_id: item_id.clone(),
                    delta: Some(ItemDelta::Arguments(delta.clone())),
                }])
            }
            ServerEvent::ResponseDone { .. } => Ok(vec![SessionEvent::ResponseDone]),
            ServerEvent::Error { error } => Ok(vec![SessionEvent::Error(error.message.clone())]),
            ServerEvent::SessionCreated { .. }
            | ServerEvent::SessionUpdated { .. }
            | ServerEvent::ResponseCreated { .. }
            | ServerEvent::Other => Ok(Vec::new()),
        }
    }

    fn add_item(&mut self, item: &Item) -> Result<Vec<SessionEvent>, RealtimeError> {
        let id = item
            .id
            .clone()
            .ok_or_else(|| RealtimeError::Protocol("Item is missing an id".to_string()))?;
        if self.get(&id).is_some() {
            trace!("[Conversation] Item {} already known.", id);
            return Ok(Vec::new());
        }

        let mut snapshot = ItemSnapshot::from_wire(id.clone(), item);
        if let Some(transcript) = self.queued_transcripts.remove(&id) {
            snapshot.transcript = transcript;
        }

        let mut input_audio = None;
        if snapshot.role == Role::User {
            input_audio = self
                .queued_speech
                .remove(&id)
                .and_then(|span| span.audio)
                .or_else(|| {
                    ItemSnapshot::has_input_audio(item)
                        .then(|| self.queued_input_audio.take())
                        .flatten()
                });
        }
        let completed = snapshot.status == ItemStatus::Completed;
        debug!(
            "[Conversation] Added {:?} item {} ({:?}).",
            snapshot.role, id, snapshot.status
        );
        self.items.push(snapshot);

        let mut events = vec![SessionEvent::ConversationUpdated {
            item_id: id.clone(),
            delta: input_audio.map(ItemDelta::InputAudio),
        }];
        if completed {
            events.push(SessionEvent::ItemCompleted { item_id: id });
        }
        Ok(events)
    }

    fn finish_item(&mut self, item: &Item) -> Result<Vec<SessionEvent>, RealtimeError> {
        let id = item
            .id
            .clone()
            .ok_or_else(|| RealtimeError::Protocol("Item is missing an id".to_string()))?;
        if self.get(&id).is_none() {
            self.add_item(item)?;
        }
        let entry = self.get_mut(&id)?;
        entry.status = item.status.into();
        if let (Some(call), Some(arguments)) = (entry.tool_call.as_mut(), &item.arguments) {
            call.arguments = arguments.clone();
        }
        let completed = entry.status == ItemStatus::Completed;

        let mut events = vec![SessionEvent::ConversationUpdated {
            item_id: id.clone(),
            delta: None,
        }];
        if completed {
            events.push(SessionEvent::ItemCompleted { item_id: id });
        }
        Ok(events)
    }
}
