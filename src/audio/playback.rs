use super::{AudioPlayback, TrackOffset, bytes_to_samples};
use crate::error::RealtimeError;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

struct QueuedChunk {
    track_id: String,
    samples: Vec<i16>,
    cursor: usize,
}

#[derive(Default)]
struct PlayerQueue {
    connected: bool,
    chunks: VecDeque<QueuedChunk>,
    /// Samples played per track, kept until another track starts playing.
    offsets: HashMap<String, u64>,
    last_track: Option<String>,
    /// Tracks cut off since the last new track was queued.
    interrupted: HashSet<String>,
}

fn lock(shared: &Mutex<PlayerQueue>) -> MutexGuard<'_, PlayerQueue> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Streaming PCM16 player.
///
/// Chunks are queued per track and drained by the output device through the
/// paired [`PlaybackOutput`]. The track of the chunk at the head of the queue is
/// the active track; its played-sample count is what [`AudioPlayback::interrupt`]
/// reports.
pub struct StreamPlayer {
    shared: Arc<Mutex<PlayerQueue>>,
}

/// Consumer half of a [`StreamPlayer`], safe to move into an audio callback.
#[derive(Clone)]
pub struct PlaybackOutput {
    shared: Arc<Mutex<PlayerQueue>>,
}

impl StreamPlayer {
    pub fn new() -> (Self, PlaybackOutput) {
        let shared = Arc::new(Mutex::new(PlayerQueue::default()));
        (
            Self {
                shared: shared.clone(),
            },
            PlaybackOutput { shared },
        )
    }

    pub fn is_playing(&self) -> bool {
        !lock(&self.shared).chunks.is_empty()
    }

    pub fn queued_samples(&self) -> usize {
        lock(&self.shared)
            .chunks
            .iter()
            .map(|c| c.samples.len() - c.cursor)
            .sum()
    }
}

impl PlaybackOutput {
    /// Fills `out` with queued mono samples, padding with silence.
    ///
    /// Returns how many samples came from the queue.
    pub fn fill(&self, out: &mut [i16]) -> usize {
        let mut queue = lock(&self.shared);
        let mut written = 0;

        while written < out.len() {
            let Some(chunk) = queue.chunks.front_mut() else {
                break;
            };
            let track_id = chunk.track_id.clone();
            let available = chunk.samples.len() - chunk.cursor;
            let n = available.min(out.len() - written);
            out[written..written + n]
                .copy_from_slice(&chunk.samples[chunk.cursor..chunk.cursor + n]);
            chunk.cursor += n;
            written += n;
            let exhausted = chunk.cursor >= chunk.samples.len();

            if queue.last_track.as_deref() != Some(track_id.as_str()) {
                if let Some(previous) = queue.last_track.take() {
                    queue.offsets.remove(&previous);
                }
                trace!("[Playback] Track {} started.", track_id);
                queue.last_track = Some(track_id.clone());
            }
            *queue.offsets.entry(track_id).or_insert(0) += n as u64;

            if exhausted {
                queue.chunks.pop_front();
            }
        }

        for sample in out[written..].iter_mut() {
            *sample = 0;
        }
        written
    }

    /// Like [`PlaybackOutput::fill`] but duplicates each sample across
    /// `channels` interleaved channels.
    pub fn fill_interleaved(&self, out: &mut [i16], channels: u16) -> usize {
        let channels = channels.max(1) as usize;
        if channels == 1 {
            return self.fill(out);
        }
        let mut mono = vec![0i16; out.len() / channels];
        let written = self.fill(&mut mono);
        for (frame, sample) in out.chunks_mut(channels).zip(mono.iter()) {
            for slot in frame.iter_mut() {
                *slot = *sample;
            }
        }
        written
    }
}

#[async_trait::async_trait]
impl AudioPlayback for StreamPlayer {
    async fn connect(&mut self) -> Result<(), RealtimeError> {
        let mut queue = lock(&self.shared);
        queue.connected = true;
        queue.interrupted.clear();
        info!("[Playback] Engine connected.");
        Ok(())
    }

    fn add_16bit_pcm(&mut self, pcm: &[u8], track_id: &str) {
        let mut queue = lock(&self.shared);
        if !queue.connected {
            warn!(
                "[Playback] Dropping {} bytes for track {}: engine not connected.",
                pcm.len(),
                track_id
            );
            return;
        }
        if queue.interrupted.contains(track_id) {
            trace!(
                "[Playback] Ignoring {} bytes for interrupted track {}.",
                pcm.len(),
                track_id
            );
            return;
        }
        if pcm.len() % 2 != 0 {
            warn!(
                "[Playback] Odd PCM16 chunk ({} bytes) for track {}, dropping trailing byte.",
                pcm.len(),
                track_id
            );
        }
        let samples = bytes_to_samples(pcm);
        if samples.is_empty() {
            return;
        }
        let is_new_track = queue
            .chunks
            .back()
            .is_none_or(|last| last.track_id != track_id)
            && queue.last_track.as_deref() != Some(track_id);
        if is_new_track && !queue.interrupted.is_empty() {
            trace!(
                "[Playback] Track {} queued, forgetting {} interrupted tracks.",
                track_id,
                queue.interrupted.len()
            );
            queue.interrupted.clear();
        }
        queue.chunks.push_back(QueuedChunk {
            track_id: track_id.to_string(),
            samples,
            cursor: 0,
        });
    }

    async fn interrupt(&mut self) -> Option<TrackOffset> {
        let mut queue = lock(&self.shared);
        let active = queue.chunks.front().map(|c| c.track_id.clone());
        queue.chunks.clear();
        let track_id = active?;

        let samples_played = queue.offsets.remove(&track_id).unwrap_or(0);
        if queue.last_track.as_deref() == Some(track_id.as_str()) {
            queue.last_track = None;
        }
        queue.interrupted.insert(track_id.clone());
        debug!(
            "[Playback] Interrupted track {} after {} samples.",
            track_id, samples_played
        );
        Some(TrackOffset {
            track_id,
            samples_played,
        })
    }
}
