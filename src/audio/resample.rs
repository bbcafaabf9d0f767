use crate::SAMPLE_RATE_HZ;
use crate::error::RealtimeError;
use audioadapter::direct::SequentialSliceOfVecs;
use rubato::{Fft, FixedSync, Indexing, Resampler};
use tracing::{debug, info, trace, warn};

const RESAMPLER_CHUNK_FRAMES: usize = 1024;
const RESAMPLER_SUB_CHUNKS: usize = 2;

/// Active resampler, bound to the input format it was created for.
struct ResamplerState {
    resampler: Fft<f32>,
    input_rate: u32,
    input_channels: u16,
    mono_buffer: Vec<f32>,
    output_alloc: Vec<Vec<f32>>,
}

/// Converts captured device audio to 24kHz mono PCM16.
///
/// The first chunk fixes the input format; a different format afterwards is
/// rejected until [`InputResampler::flush`] resets the state.
pub(crate) struct InputResampler {
    state: Option<ResamplerState>,
}

fn to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            (s * (i16::MAX as f32 + 1.0))
                .clamp(i16::MIN as f32, i16::MAX as f32)
                .round() as i16
        })
        .collect()
}

impl InputResampler {
    pub(crate) fn new() -> Self {
        Self { state: None }
    }

    pub(crate) fn process_chunk(
        &mut self,
        samples: &[i16],
        input_rate: u32,
        input_channels: u16,
    ) -> Result<Vec<i16>, RealtimeError> {
        if samples.is_empty() || input_channels == 0 {
            return Ok(Vec::new());
        }
        if self.state.is_none() {
            self.state = Some(Self::create_state(input_rate, input_channels)?);
        }
        let state = self.state.as_mut().ok_or_else(|| {
            RealtimeError::AudioResampling("Resampler state missing after init".to_string())
        })?;

        if state.input_rate != input_rate || state.input_channels != input_channels {
            return Err(RealtimeError::AudioFormat(format!(
                "Audio format changed. Resampler initialized for {}Hz {}ch, but received {}Hz {}ch. Pause capture before changing formats.",
                state.input_rate, state.input_channels, input_rate, input_channels
            )));
        }

        let channels = input_channels as usize;
        let frames = samples.len() / channels;
        for i in 0..frames {
            let mut sum = 0.0f32;
            for ch in 0..channels {
                sum += samples[i * channels + ch] as f32 / (i16::MAX as f32 + 1.0);
            }
            state.mono_buffer.push(sum / channels as f32);
        }
        trace!(
            "[Resampler] Buffered {} mono frames, {} pending.",
            frames,
            state.mono_buffer.len()
        );

        let mut out = Vec::new();
        loop {
            let needed = state.resampler.input_frames_next();
            if needed == 0 || state.mono_buffer.len() < needed {
                break;
            }
            let chunk: Vec<f32> = state.mono_buffer.drain(..needed).collect();
            out.extend(Self::run(state, vec![chunk], needed, None)?);
        }
        Ok(out)
    }

    /// Drains buffered audio and the resampler's internal delay, then resets.
    pub(crate) fn flush(&mut self) -> Result<Vec<i16>, RealtimeError> {
        let Some(mut state) = self.state.take() else {
            debug!("[Resampler] Flush requested with no active state.");
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        if !state.mono_buffer.is_empty() {
            let partial_len = state.mono_buffer.len();
            let chunk: Vec<f32> = state.mono_buffer.drain(..).collect();
            let indexing = Indexing {
                input_offset: 0,
                output_offset: 0,
                partial_len: Some(partial_len),
                active_channels_mask: None,
            };
            out.extend(Self::run(&mut state, vec![chunk], partial_len, Some(&indexing))?);
        }

        let delay = state.resampler.output_delay();
        let mut remaining = delay.saturating_sub(out.len());
        for _ in 0..5 {
            if remaining == 0 {
                break;
            }
            let indexing = Indexing {
                input_offset: 0,
                output_offset: 0,
                partial_len: Some(0),
                active_channels_mask: None,
            };
            let produced = Self::run(&mut state, vec![Vec::new()], 0, Some(&indexing))?;
            if produced.is_empty() {
                break;
            }
            remaining = remaining.saturating_sub(produced.len());
            out.extend(produced);
        }
        if remaining > 0 {
            warn!(
                "[Resampler] Flush may be incomplete, {} delay frames unaccounted for.",
                remaining
            );
        }
        info!("[Resampler] Flushed {} frames.", out.len());
        Ok(out)
    }

    fn create_state(input_rate: u32, input_channels: u16) -> Result<ResamplerState, RealtimeError> {
        info!(
            "[Resampler] Initializing for {}Hz {}ch -> {}Hz mono.",
            input_rate, input_channels, SAMPLE_RATE_HZ
        );
        let resampler = Fft::<f32>::new(
            input_rate as usize,
            SAMPLE_RATE_HZ as usize,
            RESAMPLER_CHUNK_FRAMES,
            RESAMPLER_SUB_CHUNKS,
            1,
            FixedSync::Input,
        )
        .map_err(|e| {
            RealtimeError::AudioResampling(format!("Failed to create Fft resampler: {}", e))
        })?;
        let max_out = resampler.output_frames_max();
        Ok(ResamplerState {
            resampler,
            input_rate,
            input_channels,
            mono_buffer: Vec::with_capacity(RESAMPLER_CHUNK_FRAMES * 2),
            output_alloc: vec![vec![0.0f32; max_out.max(1)]],
        })
    }

    fn run(
        state: &mut ResamplerState,
        input: Vec<Vec<f32>>,
        frames: usize,
        indexing: Option<&Indexing>,
    ) -> Result<Vec<i16>, RealtimeError> {
        let input_adapter = SequentialSliceOfVecs::new(&input, 1, frames)
            .map_err(|e| RealtimeError::AudioResampling(format!("Input adapter error: {}", e)))?;

        let out_frames = state.resampler.output_frames_next().max(1);
        state.output_alloc[0].resize(out_frames, 0.0);
        let mut output_adapter = SequentialSliceOfVecs::new_mut(&mut state.output_alloc, 1, out_frames)
            .map_err(|e| RealtimeError::AudioResampling(format!("Output adapter error: {}", e)))?;

        let (_read, written) = state
            .resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, indexing)
            .map_err(|e| RealtimeError::AudioResampling(e.to_string()))?;

        Ok(to_i16(&state.output_alloc[0][..written]))
    }
}
