use crate::audio::{AudioAsset, AudioPlayback, samples_to_bytes};
use crate::client::{ItemDelta, ItemSnapshot, ItemStatus, ToolCall};
use crate::types::{ItemType, Role};
use std::collections::HashMap;
use tracing::{debug, info, trace, warn};

/// Display-ready conversation item owned by the reconciler.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationItem {
    pub id: String,
    pub kind: ItemType,
    pub role: Role,
    pub status: ItemStatus,
    pub text: String,
    pub transcript: String,
    /// Raw PCM16 bytes, growing until the item completes.
    pub audio: Vec<u8>,
    /// Set once the completed item's audio has been decoded.
    pub asset: Option<AudioAsset>,
    pub tool_call: Option<ToolCall>,
    pub output: Option<String>,
    finalized: bool,
}

impl ConversationItem {
    fn from_snapshot(snapshot: &ItemSnapshot) -> Self {
        Self {
            id: snapshot.id.clone(),
            kind: snapshot.kind,
            role: snapshot.role,
            status: snapshot.status,
            text: String::new(),
            transcript: String::new(),
            audio: Vec::new(),
            asset: None,
            tool_call: None,
            output: None,
            finalized: false,
        }
        .merged(snapshot)
    }

    fn merged(mut self, snapshot: &ItemSnapshot) -> Self {
        self.kind = snapshot.kind;
        self.role = snapshot.role;
        self.status = snapshot.status;
        self.text = snapshot.text.clone();
        self.transcript = snapshot.transcript.clone();
        self.tool_call = snapshot.tool_call.clone();
        self.output = snapshot.output.clone();
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == ItemStatus::Completed
    }
}

/// Merges streamed deltas into the ordered item list.
///
/// The list itself is rebuilt from the remote snapshot on every notification;
/// only audio buffers and decoded assets live here alone.
#[derive(Debug)]
pub struct ConversationReconciler {
    items: Vec<ConversationItem>,
    sample_rate: u32,
    decodes: usize,
}

impl ConversationReconciler {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            items: Vec::new(),
            sample_rate,
            decodes: 0,
        }
    }

    pub fn items(&self) -> &[ConversationItem] {
        &self.items
    }

    pub fn get(&self, item_id: &str) -> Option<&ConversationItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    /// Number of audio decodes performed since construction.
    pub fn decode_count(&self) -> usize {
        self.decodes
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn on_updated<P: AudioPlayback>(
        &mut self,
        item_id: &str,
        delta: Option<ItemDelta>,
        snapshot: &[ItemSnapshot],
        playback: &mut P,
    ) {
        self.sync(snapshot);
        if let Some(delta) = delta {
            self.apply_delta(item_id, delta, playback);
        }
        self.finalize_completed();
    }

    pub fn on_completed(&mut self, item_id: &str, snapshot: &[ItemSnapshot]) {
        trace!("[Controller] Item {} completed.", item_id);
        self.sync(snapshot);
        self.finalize_completed();
    }

    fn sync(&mut self, snapshot: &[ItemSnapshot]) {
        let mut local: HashMap<String, ConversationItem> = self
            .items
            .drain(..)
            .map(|item| (item.id.clone(), item))
            .collect();
        self.items = snapshot
            .iter()
            .map(|remote| match local.remove(&remote.id) {
                Some(item) => item.merged(remote),
                None => ConversationItem::from_snapshot(remote),
            })
            .collect();
        for removed in local.keys() {
            debug!("[Controller] Item {} dropped from the conversation.", removed);
        }

        let active = self
            .items
            .iter()
            .filter(|item| item.role == Role::Assistant && !item.is_completed())
            .count();
        if active > 1 {
            warn!(
                "[Controller] {} assistant items in progress at once.",
                active
            );
        }
    }

    fn apply_delta<P: AudioPlayback>(&mut self, item_id: &str, delta: ItemDelta, playback: &mut P) {
        let sample_rate = self.sample_rate;
        let Some(item) = self.items.iter_mut().find(|item| item.id == item_id) else {
            if !matches!(delta, ItemDelta::Removed) {
                warn!("[Controller] Delta for unknown item {} ignored.", item_id);
            }
            return;
        };
        match delta {
            ItemDelta::Audio(bytes) => {
                item.audio.extend_from_slice(&bytes);
                playback.add_16bit_pcm(&bytes, item_id);
            }
            ItemDelta::InputAudio(samples) => {
                item.audio.extend_from_slice(&samples_to_bytes(&samples));
            }
            ItemDelta::Truncated { audio_end_ms } => {
                let samples = audio_end_ms.saturating_mul(sample_rate as u64) / 1000;
                let end = usize::try_from(samples)
                    .unwrap_or(usize::MAX)
                    .saturating_mul(2);
                if end < item.audio.len() {
                    debug!(
                        "[Controller] Truncating {} audio to {} bytes.",
                        item_id, end
                    );
                    item.audio.truncate(end);
                    if item.finalized {
                        item.asset = Self::decode(&item.id, &item.audio, sample_rate);
                        self.decodes += 1;
                    }
                }
            }
            ItemDelta::Transcript(_) | ItemDelta::Text(_) | ItemDelta::Arguments(_) => {}
            ItemDelta::Removed => {}
        }
    }

    /// Decodes every newly completed item exactly once.
    fn finalize_completed(&mut self) {
        for item in self
            .items
            .iter_mut()
            .filter(|item| item.is_completed() && !item.finalized)
        {
            item.finalized = true;
            if item.audio.is_empty() {
                continue;
            }
            item.asset = Self::decode(&item.id, &item.audio, self.sample_rate);
            self.decodes += 1;
        }
    }

    fn decode(item_id: &str, audio: &[u8], sample_rate: u32) -> Option<AudioAsset> {
        if audio.is_empty() {
            return None;
        }
        match AudioAsset::from_pcm16(audio, sample_rate) {
            Ok(asset) => {
                info!(
                    "[Controller] Decoded {} bytes of audio for {} ({:?}).",
                    audio.len(),
                    item_id,
                    asset.duration
                );
                Some(asset)
            }
            Err(e) => {
                warn!("[Controller] Audio for {} not playable: {}", item_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::TrackOffset;
    use crate::error::RealtimeError;

    #[derive(Default)]
    struct RecordingPlayback {
        chunks: Vec<(String, usize)>,
    }

    #[async_trait::async_trait]
    impl AudioPlayback for RecordingPlayback {
        async fn connect(&mut self) -> Result<(), RealtimeError> {
            Ok(())
        }

        fn add_16bit_pcm(&mut self, pcm: &[u8], track_id: &str) {
            self.chunks.push((track_id.to_string(), pcm.len()));
        }

        async fn interrupt(&mut self) -> Option<TrackOffset> {
            None
        }
    }

    fn assistant(id: &str, status: ItemStatus) -> ItemSnapshot {
        let mut item = ItemSnapshot::new(id, ItemType::Message, Role::Assistant);
        item.status = status;
        item.audio_index = Some(0);
        item
    }

    #[test]
    fn test_audio_is_streamed_and_decoded_once() {
        let mut reconciler = ConversationReconciler::new(24000);
        let mut playback = RecordingPlayback::default();
        let in_progress = vec![assistant("a1", ItemStatus::InProgress)];

        for len in [100, 150, 200] {
            reconciler.on_updated(
                "a1",
                Some(ItemDelta::Audio(vec![0; len])),
                &in_progress,
                &mut playback,
            );
        }
        assert_eq!(playback.chunks.len(), 3);
        assert!(playback.chunks.iter().all(|(track, _)| track == "a1"));
        assert!(reconciler.get("a1").unwrap().asset.is_none());

        let completed = vec![assistant("a1", ItemStatus::Completed)];
        reconciler.on_completed("a1", &completed);
        reconciler.on_completed("a1", &completed);

        let item = reconciler.get("a1").unwrap();
        assert_eq!(reconciler.decode_count(), 1);
        assert_eq!(item.asset.as_ref().unwrap().pcm_len, 450);
        assert_eq!(reconciler.items().len(), 1);
    }

    #[test]
    fn test_completed_update_decodes_before_completion_notice() {
        let mut reconciler = ConversationReconciler::new(24000);
        let mut playback = RecordingPlayback::default();
        let completed = vec![assistant("a1", ItemStatus::Completed)];

        reconciler.on_updated("a1", Some(ItemDelta::Audio(vec![1; 8])), &completed, &mut playback);
        assert!(reconciler.get("a1").unwrap().asset.is_some());
        reconciler.on_completed("a1", &completed);
        assert_eq!(reconciler.decode_count(), 1);
    }

    #[test]
    fn test_undecodable_audio_still_completes() {
        let mut reconciler = ConversationReconciler::new(24000);
        let mut playback = RecordingPlayback::default();
        reconciler.on_updated(
            "a1",
            Some(ItemDelta::Audio(vec![1; 3])),
            &[assistant("a1", ItemStatus::InProgress)],
            &mut playback,
        );
        let mut completed = assistant("a1", ItemStatus::Completed);
        completed.transcript = "Hello".to_string();
        reconciler.on_completed("a1", &[completed]);

        let item = reconciler.get("a1").unwrap();
        assert!(item.is_completed());
        assert!(item.asset.is_none());
        assert_eq!(item.transcript, "Hello");
    }

    #[test]
    fn test_user_audio_is_buffered_without_playback() {
        let mut reconciler = ConversationReconciler::new(24000);
        let mut playback = RecordingPlayback::default();
        let mut user = ItemSnapshot::new("u1", ItemType::Message, Role::User);
        user.status = ItemStatus::Completed;

        reconciler.on_updated(
            "u1",
            Some(ItemDelta::InputAudio(vec![7; 240])),
            &[user],
            &mut playback,
        );
        assert!(playback.chunks.is_empty());
        assert_eq!(
            reconciler.get("u1").unwrap().asset.as_ref().unwrap().pcm_len,
            480
        );
    }

    #[test]
    fn test_truncation_trims_buffer() {
        let mut reconciler = ConversationReconciler::new(24000);
        let mut playback = RecordingPlayback::default();
        let snapshot = vec![assistant("a1", ItemStatus::InProgress)];
        reconciler.on_updated("a1", Some(ItemDelta::Audio(vec![0; 4800])), &snapshot, &mut playback);
        reconciler.on_updated(
            "a1",
            Some(ItemDelta::Truncated { audio_end_ms: 50 }),
            &snapshot,
            &mut playback,
        );
        assert_eq!(reconciler.get("a1").unwrap().audio.len(), 2400);
    }

    #[test]
    fn test_truncation_past_the_end_keeps_buffer() {
        let mut reconciler = ConversationReconciler::new(24000);
        let mut playback = RecordingPlayback::default();
        let snapshot = vec![assistant("a1", ItemStatus::InProgress)];
        reconciler.on_updated("a1", Some(ItemDelta::Audio(vec![0; 480])), &snapshot, &mut playback);
        reconciler.on_updated(
            "a1",
            Some(ItemDelta::Truncated {
                audio_end_ms: u64::MAX,
            }),
            &snapshot,
            &mut playback,
        );
        assert_eq!(reconciler.get("a1").unwrap().audio.len(), 480);
    }

    #[test]
    fn test_order_follows_snapshot_and_removals() {
        let mut reconciler = ConversationReconciler::new(24000);
        let mut playback = RecordingPlayback::default();
        let a = assistant("a1", ItemStatus::Completed);
        let u = ItemSnapshot::new("u1", ItemType::Message, Role::User);

        reconciler.on_updated("u1", None, &[u.clone(), a.clone()], &mut playback);
        let ids: Vec<_> = reconciler.items().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["u1", "a1"]);

        reconciler.on_updated("u1", Some(ItemDelta::Removed), &[a], &mut playback);
        let ids: Vec<_> = reconciler.items().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["a1"]);
    }
}
