//! Inbound audio chunk type.
//!
//! Audio payloads are treated as opaque bytes on their way to the STT
//! service; only the size cap and a pcm16 duration estimate matter here.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Upper bound on a single inbound audio chunk.
pub const MAX_AUDIO_CHUNK_BYTES: usize = 100 * 1024;

/// Supported inbound audio container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Pcm,
    Wav,
    Webm,
}

/// One chunk of user audio as received from the client.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub data: Bytes,
    pub format: AudioFormat,
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(data: Bytes, format: AudioFormat, sample_rate: u32) -> Result<Self> {
        if data.len() > MAX_AUDIO_CHUNK_BYTES {
            return Err(Error::AudioChunkTooLarge {
                size: data.len(),
                max: MAX_AUDIO_CHUNK_BYTES,
            });
        }
        Ok(Self {
            data,
            format,
            sample_rate,
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Approximate duration assuming 16-bit mono PCM. Only meaningful for
    /// `AudioFormat::Pcm`; containers return a rough lower bound.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        let samples = (self.data.len() / 2) as u64;
        samples * 1000 / self.sample_rate as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_oversize_chunks() {
        let data = Bytes::from(vec![0u8; MAX_AUDIO_CHUNK_BYTES + 1]);
        let err = AudioChunk::new(data, AudioFormat::Pcm, 16_000).unwrap_err();
        assert!(matches!(err, Error::AudioChunkTooLarge { .. }));
    }

    #[test]
    fn pcm16_duration_estimate() {
        // 100ms of 16kHz mono pcm16 = 3200 bytes
        let chunk =
            AudioChunk::new(Bytes::from(vec![0u8; 3200]), AudioFormat::Pcm, 16_000).unwrap();
        assert_eq!(chunk.duration_ms(), 100);
    }
}
