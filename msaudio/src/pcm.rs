//! Canonical PCM layout shared by the whole pipeline.

use std::time::Duration;

/// Output sample rate of the decoder chain and of both encoders.
pub const SAMPLE_RATE: u32 = 48_000;

/// Output channel count.
pub const CHANNELS: u8 = 2;

/// Bytes per interleaved stereo s16le frame.
pub const FRAME_BYTES: usize = 4;

/// One pacing window: 20 ms of canonical PCM.
pub const PCM_WINDOW_BYTES: usize = 3840;

/// Duration of one pacing window.
pub const PCM_WINDOW: Duration = Duration::from_millis(20);

/// Format of the PCM produced by a decoder before normalisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channels: u8,
}

impl StreamInfo {
    pub const CANONICAL: StreamInfo = StreamInfo {
        sample_rate: SAMPLE_RATE,
        channels: CHANNELS,
    };

    pub fn is_canonical(&self) -> bool {
        *self == Self::CANONICAL
    }
}

/// Number of sample frames held by `bytes` of canonical PCM.
pub fn frames_in(bytes: usize) -> u64 {
    (bytes / FRAME_BYTES) as u64
}

/// Playback duration of `frames` sample frames at 48 kHz.
pub fn frames_to_duration(frames: u64) -> Duration {
    Duration::from_nanos(frames.saturating_mul(1_000_000_000) / SAMPLE_RATE as u64)
}

/// Decodes little-endian s16 bytes into samples. A trailing odd byte is ignored.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Appends samples as little-endian s16 bytes.
pub fn extend_le_bytes(out: &mut Vec<u8>, samples: &[i16]) {
    out.reserve(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
}

/// Turns interleaved samples with `channels` channels into stereo.
///
/// Mono is duplicated; more than two channels keep the first two.
pub fn to_stereo(samples: &[i16], channels: u8) -> Vec<i16> {
    match channels {
        2 => samples.to_vec(),
        0 | 1 => samples.iter().flat_map(|&s| [s, s]).collect(),
        n => samples
            .chunks_exact(n as usize)
            .flat_map(|frame| [frame[0], frame[1]])
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_is_twenty_ms() {
        assert_eq!(frames_in(PCM_WINDOW_BYTES), 960);
        assert_eq!(frames_to_duration(960), PCM_WINDOW);
    }

    #[test]
    fn test_to_stereo() {
        assert_eq!(to_stereo(&[1, 2], 1), vec![1, 1, 2, 2]);
        assert_eq!(to_stereo(&[1, 2, 3, 4, 5, 6], 3), vec![1, 2, 4, 5]);
        assert_eq!(to_stereo(&[7, 8], 2), vec![7, 8]);
    }

    #[test]
    fn test_le_roundtrip() {
        let mut bytes = Vec::new();
        extend_le_bytes(&mut bytes, &[-1, 256]);
        assert_eq!(bytes, vec![0xff, 0xff, 0x00, 0x01]);
        assert_eq!(bytes_to_samples(&bytes), vec![-1, 256]);
    }
}
