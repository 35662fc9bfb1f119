use std::io::Cursor;
use std::sync::Arc;

use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::RwLock;

use crate::error::AudioError;

/// A standalone encoded sub-range of the source audio.
#[derive(Debug, Clone)]
pub struct EncodedClip {
    pub bytes: Vec<u8>,
    pub sample_rate: u32,
    pub sample_length: u64,
}

impl EncodedClip {
    pub fn duration_secs(&self) -> f64 {
        self.sample_length as f64 / self.sample_rate as f64
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Provider of source audio clips.
pub trait AudioSource: Send + Sync + 'static {
    fn sample_rate(&self) -> u32;

    /// Extracts `[sample_start, sample_start + sample_length)` as an encoded clip.
    fn get_clip(&self, sample_start: u64, sample_length: u64) -> Result<EncodedClip, AudioError>;
}

/// In-memory mono 16-bit PCM source that encodes clips as WAV.
pub struct PcmAudioSource {
    sample_rate: u32,
    samples: RwLock<Option<Arc<[i16]>>>,
}

impl PcmAudioSource {
    pub fn new(sample_rate: u32, samples: Vec<i16>) -> Self {
        Self {
            sample_rate,
            samples: RwLock::new(Some(samples.into())),
        }
    }

    /// Drops the decoded buffer; further cuts fail with `SourceUnavailable`.
    pub fn unload(&self) {
        *self.samples.write() = None;
    }

    pub fn total_samples(&self) -> u64 {
        self.samples.read().as_ref().map_or(0, |s| s.len() as u64)
    }
}

impl AudioSource for PcmAudioSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn get_clip(&self, sample_start: u64, sample_length: u64) -> Result<EncodedClip, AudioError> {
        let samples = self
            .samples
            .read()
            .clone()
            .ok_or(AudioError::SourceUnavailable)?;

        let total = samples.len() as u64;
        let end = sample_start.checked_add(sample_length);
        let range = match end {
            Some(end) if end <= total => sample_start as usize..end as usize,
            _ => {
                return Err(AudioError::OutOfRange {
                    start: sample_start,
                    length: sample_length,
                    total,
                });
            }
        };

        let spec = WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let mut bytes = Vec::with_capacity(44 + range.len() * 2);
        {
            let mut writer = WavWriter::new(Cursor::new(&mut bytes), spec)
                .map_err(|e| AudioError::Encode(e.to_string()))?;
            for &sample in &samples[range] {
                writer
                    .write_sample(sample)
                    .map_err(|e| AudioError::Encode(e.to_string()))?;
            }
            writer
                .finalize()
                .map_err(|e| AudioError::Encode(e.to_string()))?;
        }

        Ok(EncodedClip {
            bytes,
            sample_rate: self.sample_rate,
            sample_length,
        })
    }
}
