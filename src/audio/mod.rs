pub mod capture;
pub mod playback;
pub mod wav;

#[cfg(feature = "audio-resampling")]
pub(crate) mod resample;

pub use capture::{CaptureInput, FrameCapture};
pub use playback::{PlaybackOutput, StreamPlayer};
pub use wav::AudioAsset;

use crate::error::RealtimeError;
use std::time::Duration;
use tokio::sync::mpsc;

/// Samples per captured frame when none is configured (200ms at 24kHz).
pub const DEFAULT_FRAME_SIZE: usize = 4800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    /// Not begun, or ended.
    Idle,
    Recording,
    Paused,
}

/// Microphone-side collaborator driven by the turn-taking logic.
///
/// Frames are mono PCM16 at [`crate::SAMPLE_RATE_HZ`] and are delivered through
/// the sender handed to [`AudioCapture::record`], in capture order.
#[async_trait::async_trait]
pub trait AudioCapture: Send {
    /// Opens the device. Fails if it is already open.
    async fn begin(&mut self) -> Result<(), RealtimeError>;

    /// Starts delivering frames to `frames` until paused or ended.
    async fn record(&mut self, frames: mpsc::Sender<Vec<i16>>) -> Result<(), RealtimeError>;

    /// Stops delivering frames, flushing any partial frame first.
    async fn pause(&mut self) -> Result<(), RealtimeError>;

    /// Closes the device.
    async fn end(&mut self) -> Result<(), RealtimeError>;

    fn status(&self) -> CaptureStatus;
}

/// Where an interrupted track had got to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackOffset {
    pub track_id: String,
    pub samples_played: u64,
}

impl TrackOffset {
    pub fn offset(&self, sample_rate: u32) -> Duration {
        if sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.samples_played * 1_000_000 / sample_rate as u64)
    }
}

/// Speaker-side collaborator that plays agent audio tagged by track id.
#[async_trait::async_trait]
pub trait AudioPlayback: Send {
    async fn connect(&mut self) -> Result<(), RealtimeError>;

    /// Queues little-endian PCM16 bytes for `track_id`.
    fn add_16bit_pcm(&mut self, pcm: &[u8], track_id: &str);

    /// Stops playback and discards everything queued.
    ///
    /// Returns the track that was playing and how many of its samples were
    /// played, or `None` when nothing was playing.
    async fn interrupt(&mut self) -> Option<TrackOffset>;
}

pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Trailing odd bytes are ignored.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}
