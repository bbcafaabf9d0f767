use super::{AudioCapture, CaptureStatus};
use crate::SAMPLE_RATE_HZ;
use crate::error::RealtimeError;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

#[cfg(feature = "audio-resampling")]
use super::resample::InputResampler;

struct CaptureShared {
    status: CaptureStatus,
    frame_size: usize,
    pending: Vec<i16>,
    sink: Option<mpsc::Sender<Vec<i16>>>,
    dropped_frames: u64,
    #[cfg(feature = "audio-resampling")]
    resampler: Option<InputResampler>,
}

impl CaptureShared {
    fn emit_full_frames(&mut self) {
        while self.pending.len() >= self.frame_size {
            let frame: Vec<i16> = self.pending.drain(..self.frame_size).collect();
            self.send(frame);
        }
    }

    fn flush_partial_frame(&mut self) {
        if !self.pending.is_empty() {
            let frame = std::mem::take(&mut self.pending);
            self.send(frame);
        }
    }

    fn send(&mut self, frame: Vec<i16>) {
        let Some(sink) = &self.sink else {
            return;
        };
        match sink.try_send(frame) {
            Ok(_) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped_frames += 1;
                if self.dropped_frames % 50 == 1 {
                    warn!(
                        "[Capture] Frame channel full, dropped {} frames so far.",
                        self.dropped_frames
                    );
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("[Capture] Frame receiver gone, detaching sink.");
                self.sink = None;
            }
        }
    }
}

/// Frame-cutting capture device.
///
/// The platform audio callback pushes raw samples through the paired
/// [`CaptureInput`]; while recording they are cut into fixed-size mono frames
/// and delivered in order. Samples pushed while idle or paused are discarded.
pub struct FrameCapture {
    shared: Arc<Mutex<CaptureShared>>,
}

/// Producer half of a [`FrameCapture`], safe to move into an audio callback.
#[derive(Clone)]
pub struct CaptureInput {
    shared: Arc<Mutex<CaptureShared>>,
}

fn lock(shared: &Mutex<CaptureShared>) -> MutexGuard<'_, CaptureShared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FrameCapture {
    pub fn new(frame_size: usize) -> (Self, CaptureInput) {
        let shared = Arc::new(Mutex::new(CaptureShared {
            status: CaptureStatus::Idle,
            frame_size: frame_size.max(1),
            pending: Vec::with_capacity(frame_size),
            sink: None,
            dropped_frames: 0,
            #[cfg(feature = "audio-resampling")]
            resampler: None,
        }));
        (
            Self {
                shared: shared.clone(),
            },
            CaptureInput { shared },
        )
    }

    pub fn dropped_frames(&self) -> u64 {
        lock(&self.shared).dropped_frames
    }
}

impl CaptureInput {
    /// Pushes mono PCM16 samples already at [`SAMPLE_RATE_HZ`].
    pub fn push(&self, samples: &[i16]) {
        let mut shared = lock(&self.shared);
        if shared.status != CaptureStatus::Recording || samples.is_empty() {
            return;
        }
        shared.pending.extend_from_slice(samples);
        trace!(
            "[Capture] Buffered {} samples, {} pending.",
            samples.len(),
            shared.pending.len()
        );
        shared.emit_full_frames();
    }

    /// Pushes interleaved PCM16 in the device's native format.
    ///
    /// Audio that is not already 24kHz mono is converted when the
    /// `audio-resampling` feature is enabled and rejected otherwise.
    pub fn push_with_format(
        &self,
        samples: &[i16],
        sample_rate: u32,
        channels: u16,
    ) -> Result<(), RealtimeError> {
        if sample_rate == SAMPLE_RATE_HZ && channels == 1 {
            self.push(samples);
            return Ok(());
        }

        #[cfg(feature = "audio-resampling")]
        {
            let mut shared = lock(&self.shared);
            if shared.status != CaptureStatus::Recording || samples.is_empty() {
                return Ok(());
            }
            let resampler = shared.resampler.get_or_insert_with(InputResampler::new);
            let converted = resampler.process_chunk(samples, sample_rate, channels)?;
            shared.pending.extend(converted);
            shared.emit_full_frames();
            return Ok(());
        }

        #[cfg(not(feature = "audio-resampling"))]
        {
            Err(RealtimeError::AudioFormat(format!(
                "Capture input ({}Hz {}ch) must be {}Hz mono. Automatic resampling not compiled.",
                sample_rate, channels, SAMPLE_RATE_HZ
            )))
        }
    }
}

#[async_trait::async_trait]
impl AudioCapture for FrameCapture {
    async fn begin(&mut self) -> Result<(), RealtimeError> {
        let mut shared = lock(&self.shared);
        if shared.status != CaptureStatus::Idle {
            return Err(RealtimeError::Capture(
                "Already connected: call end() before begin()".to_string(),
            ));
        }
        shared.status = CaptureStatus::Paused;
        info!("[Capture] Device opened.");
        Ok(())
    }

    async fn record(&mut self, frames: mpsc::Sender<Vec<i16>>) -> Result<(), RealtimeError> {
        let mut shared = lock(&self.shared);
        match shared.status {
            CaptureStatus::Idle => Err(RealtimeError::Capture(
                "Session ended: call begin() first".to_string(),
            )),
            CaptureStatus::Recording => {
                Err(RealtimeError::Capture("Already recording".to_string()))
            }
            CaptureStatus::Paused => {
                shared.sink = Some(frames);
                shared.status = CaptureStatus::Recording;
                info!("[Capture] Recording started.");
                Ok(())
            }
        }
    }

    async fn pause(&mut self) -> Result<(), RealtimeError> {
        let mut shared = lock(&self.shared);
        if shared.status == CaptureStatus::Idle {
            return Err(RealtimeError::Capture(
                "Session ended: call begin() first".to_string(),
            ));
        }
        #[cfg(feature = "audio-resampling")]
        {
            if let Some(mut resampler) = shared.resampler.take() {
                match resampler.flush() {
                    Ok(tail) => shared.pending.extend(tail),
                    Err(e) => warn!("[Capture] Failed to flush resampler on pause: {}", e),
                }
            }
        }
        shared.flush_partial_frame();
        shared.sink = None;
        shared.status = CaptureStatus::Paused;
        info!("[Capture] Recording paused.");
        Ok(())
    }

    async fn end(&mut self) -> Result<(), RealtimeError> {
        let mut shared = lock(&self.shared);
        shared.sink = None;
        shared.pending.clear();
        #[cfg(feature = "audio-resampling")]
        {
            shared.resampler = None;
        }
        shared.status = CaptureStatus::Idle;
        info!("[Capture] Device closed.");
        Ok(())
    }

    fn status(&self) -> CaptureStatus {
        lock(&self.shared).status
    }
}
