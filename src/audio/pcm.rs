//! PCM16LE wire codec.
//!
//! - Outbound: normalized f32 → clamp → `round(x * 32767)` → little-endian bytes → base64
//! - Inbound: base64 → little-endian bytes → per-channel f32 in [-1, 1]

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

const SCALE: f32 = i16::MAX as f32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PcmError {
    #[error("PCM16 payload has odd length {0}")]
    OddLength(usize),

    #[error("{samples} samples cannot be split into {channels} channels")]
    ChannelMismatch { samples: usize, channels: usize },

    #[error("channel count must be at least 1")]
    NoChannels,

    #[error("invalid base64 payload: {0}")]
    Base64(String),
}

/// One outbound audio message: base64 PCM16LE plus the rate it was captured at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireAudioChunk {
    pub data: String,
    pub sample_rate: u32,
}

impl WireAudioChunk {
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    /// Raw PCM16LE bytes of this chunk.
    pub fn pcm_bytes(&self) -> Result<Vec<u8>, PcmError> {
        STANDARD
            .decode(&self.data)
            .map_err(|e| PcmError::Base64(e.to_string()))
    }
}

#[inline]
fn to_i16(x: f32) -> i16 {
    // NaN 当作静音
    let x = if x.is_nan() { 0.0 } else { x.clamp(-1.0, 1.0) };
    // `as` saturates at the i16 bounds
    (x * SCALE).round() as i16
}

#[inline]
fn to_f32(s: i16) -> f32 {
    (s as f32 / SCALE).clamp(-1.0, 1.0)
}

/// Pack normalized samples as PCM16LE.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &x in samples {
        out.extend_from_slice(&to_i16(x).to_le_bytes());
    }
    out
}

/// Encode one capture frame for the wire.
pub fn encode(samples: &[f32], sample_rate: u32) -> WireAudioChunk {
    WireAudioChunk {
        data: STANDARD.encode(encode_pcm16(samples)),
        sample_rate,
    }
}

/// Decode interleaved PCM16LE into one sample vector per channel.
///
/// The byte length must be a whole number of frames; anything else is rejected.
pub fn decode_pcm16(bytes: &[u8], channels: usize) -> Result<Vec<Vec<f32>>, PcmError> {
    if channels == 0 {
        return Err(PcmError::NoChannels);
    }
    if bytes.len() % 2 != 0 {
        return Err(PcmError::OddLength(bytes.len()));
    }
    let samples = bytes.len() / 2;
    if samples % channels != 0 {
        return Err(PcmError::ChannelMismatch { samples, channels });
    }

    let frames = samples / channels;
    let mut out: Vec<Vec<f32>> = (0..channels).map(|_| Vec::with_capacity(frames)).collect();
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let s = i16::from_le_bytes([pair[0], pair[1]]);
        out[i % channels].push(to_f32(s));
    }
    Ok(out)
}

/// Transport-decode then PCM-decode an inbound chunk.
pub fn decode_base64(data: &str, channels: usize) -> Result<Vec<Vec<f32>>, PcmError> {
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| PcmError::Base64(e.to_string()))?;
    decode_pcm16(&bytes, channels)
}

/// Linear interpolation resampler for mono buffers.
///
/// Only used when the output device grants a rate other than the stream's.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }
    let out_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos.floor() as usize;
            if idx >= last {
                return samples[last];
            }
            let frac = (pos - idx as f64) as f32;
            samples[idx] + (samples[idx + 1] - samples[idx]) * frac
        })
        .collect()
}

/// Duplicate or average channels so a mono buffer fits a device layout.
pub fn interleave_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let mut out = Vec::with_capacity(samples.len() * channels);
    for &s in samples {
        for _ in 0..channels {
            out.push(s);
        }
    }
    out
}

/// Convert normalized samples into device-native i16.
pub fn to_i16_samples(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&x| to_i16(x)).collect()
}

/// Convert device-native i16 into normalized samples.
pub fn from_i16_samples(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| to_f32(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const LSB: f32 = 1.0 / SCALE;

    #[test]
    fn full_scale_does_not_overflow() {
        assert_eq!(encode_pcm16(&[1.0]), i16::MAX.to_le_bytes().to_vec());
        assert_eq!(encode_pcm16(&[-1.0]), (-i16::MAX).to_le_bytes().to_vec());
        assert_eq!(encode_pcm16(&[7.5]), i16::MAX.to_le_bytes().to_vec());
        assert_eq!(encode_pcm16(&[-7.5]), (-i16::MAX).to_le_bytes().to_vec());
        assert_eq!(encode_pcm16(&[f32::NAN]), vec![0, 0]);
    }

    #[test]
    fn little_endian_layout() {
        // 0.5 * 32767 = 16383.5 → 16384 = 0x4000
        assert_eq!(encode_pcm16(&[0.5]), vec![0x00, 0x40]);
    }

    #[test]
    fn chunk_carries_capture_rate() {
        let chunk = encode(&[0.0; 4], 48000);
        assert_eq!(chunk.sample_rate, 48000);
        assert_eq!(chunk.mime_type(), "audio/pcm;rate=48000");
        assert_eq!(chunk.pcm_bytes().unwrap().len(), 8);
    }

    #[test]
    fn rejects_partial_frames() {
        assert_eq!(decode_pcm16(&[0, 0, 0], 1), Err(PcmError::OddLength(3)));
        assert_eq!(
            decode_pcm16(&[0, 0, 0, 0, 0, 0], 2),
            Err(PcmError::ChannelMismatch { samples: 3, channels: 2 })
        );
        assert_eq!(decode_pcm16(&[0, 0], 0), Err(PcmError::NoChannels));
        assert!(matches!(decode_base64("%%%", 1), Err(PcmError::Base64(_))));
    }

    #[test]
    fn deinterleaves_stereo() {
        let bytes = encode_pcm16(&[0.25, -0.25, 0.5, -0.5]);
        let channels = decode_pcm16(&bytes, 2).unwrap();
        assert_eq!(channels.len(), 2);
        assert!((channels[0][0] - 0.25).abs() <= LSB);
        assert!((channels[1][1] + 0.5).abs() <= LSB);
    }

    #[test]
    fn resample_changes_length_by_ratio() {
        let input = vec![0.0f32; 480];
        assert_eq!(resample_linear(&input, 24000, 48000).len(), 960);
        assert_eq!(resample_linear(&input, 48000, 16000).len(), 160);
        assert_eq!(resample_linear(&input, 24000, 24000).len(), 480);
    }

    #[test]
    fn resample_interpolates_between_neighbours() {
        let out = resample_linear(&[0.0, 1.0], 1, 2);
        assert_eq!(out.len(), 4);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn round_trip_within_one_lsb(
            samples in proptest::collection::vec(-1.0f32..=1.0, 0..512),
            rate in prop::sample::select(vec![8000u32, 16000, 24000, 44100, 48000]),
        ) {
            let chunk = encode(&samples, rate);
            prop_assert_eq!(chunk.sample_rate, rate);
            let decoded = decode_base64(&chunk.data, 1).unwrap();
            prop_assert_eq!(decoded[0].len(), samples.len());
            for (a, b) in samples.iter().zip(&decoded[0]) {
                prop_assert!((a - b).abs() <= LSB);
            }
        }
    }
}
