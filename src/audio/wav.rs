use crate::error::RealtimeError;
use std::io::Cursor;
use std::time::Duration;

/// Playable rendition of a completed item's audio: an in-memory WAV file.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioAsset {
    pub wav: Vec<u8>,
    /// Length of the PCM16 buffer the asset was built from.
    pub pcm_len: usize,
    pub sample_rate: u32,
    pub duration: Duration,
}

impl AudioAsset {
    pub fn from_pcm16(pcm: &[u8], sample_rate: u32) -> Result<Self, RealtimeError> {
        if pcm.is_empty() {
            return Err(RealtimeError::Decode("PCM16 buffer is empty".to_string()));
        }
        if pcm.len() % 2 != 0 {
            return Err(RealtimeError::Decode(format!(
                "PCM16 buffer has odd length {}",
                pcm.len()
            )));
        }

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::with_capacity(44 + pcm.len()));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| RealtimeError::Decode(e.to_string()))?;
            for chunk in pcm.chunks_exact(2) {
                writer
                    .write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))
                    .map_err(|e| RealtimeError::Decode(e.to_string()))?;
            }
            writer
                .finalize()
                .map_err(|e| RealtimeError::Decode(e.to_string()))?;
        }

        let samples = (pcm.len() / 2) as u64;
        Ok(Self {
            wav: cursor.into_inner(),
            pcm_len: pcm.len(),
            sample_rate,
            duration: Duration::from_micros(samples * 1_000_000 / sample_rate.max(1) as u64),
        })
    }
}
