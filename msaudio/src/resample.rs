//! Normalisation to the canonical PCM layout (stereo, 48 kHz).

use soxr::format::Stereo;
use soxr::params::{QualityRecipe, QualitySpec, RuntimeSpec};
use soxr::Soxr;

use crate::{
    error::{AudioError, Result},
    pcm::{extend_le_bytes, to_stereo, StreamInfo, SAMPLE_RATE},
};

/// Extra output frames reserved on top of the rate ratio.
const OUTPUT_SLACK: usize = 64;

/// Stereo sample-rate converter (libsoxr, high quality).
pub struct Resampler {
    ratio: f64,
    soxr: Soxr<Stereo<f32>>,
}

impl Resampler {
    pub fn new(source_hz: u32, dest_hz: u32) -> Result<Self> {
        let quality = QualitySpec::new(QualityRecipe::high());
        let soxr = Soxr::<Stereo<f32>>::new_with_params(
            source_hz as f64,
            dest_hz as f64,
            quality,
            RuntimeSpec::default(),
        )
        .map_err(|e| AudioError::Decode(format!("resampler init: {e}")))?;
        Ok(Self {
            ratio: dest_hz as f64 / source_hz as f64,
            soxr,
        })
    }

    /// Converts interleaved stereo samples.
    pub fn process(&mut self, stereo: &[i16]) -> Result<Vec<i16>> {
        let input: Vec<[f32; 2]> = stereo
            .chunks_exact(2)
            .map(|frame| [to_f32(frame[0]), to_f32(frame[1])])
            .collect();
        let capacity = (input.len() as f64 * self.ratio).ceil() as usize + OUTPUT_SLACK;
        let mut output = vec![[0.0f32; 2]; capacity];

        let processed = self
            .soxr
            .process(&input, &mut output)
            .map_err(|e| AudioError::Decode(format!("resampler: {e}")))?;
        output.truncate(processed.output_frames);
        Ok(from_frames(&output))
    }

    /// Flushes the samples still held in the filter.
    pub fn drain(&mut self) -> Result<Vec<i16>> {
        let mut output = vec![[0.0f32; 2]; 4096];
        let produced = self
            .soxr
            .drain(&mut output)
            .map_err(|e| AudioError::Decode(format!("resampler drain: {e}")))?;
        output.truncate(produced);
        Ok(from_frames(&output))
    }
}

fn to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

fn from_f32(sample: f32) -> i16 {
    (sample * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

fn from_frames(frames: &[[f32; 2]]) -> Vec<i16> {
    frames
        .iter()
        .flat_map(|[l, r]| [from_f32(*l), from_f32(*r)])
        .collect()
}

/// Converts decoder output of any layout into canonical s16le bytes.
pub struct Normalizer {
    input: StreamInfo,
    resampler: Option<Resampler>,
}

impl Normalizer {
    pub fn new(input: StreamInfo) -> Result<Self> {
        let resampler = if input.sample_rate != SAMPLE_RATE {
            Some(Resampler::new(input.sample_rate, SAMPLE_RATE)?)
        } else {
            None
        };
        Ok(Self { input, resampler })
    }

    pub fn input(&self) -> StreamInfo {
        self.input
    }

    pub fn process(&mut self, samples: &[i16]) -> Result<Vec<u8>> {
        let stereo = to_stereo(samples, self.input.channels);
        let stereo = match self.resampler.as_mut() {
            Some(resampler) => resampler.process(&stereo)?,
            None => stereo,
        };
        let mut bytes = Vec::with_capacity(stereo.len() * 2);
        extend_le_bytes(&mut bytes, &stereo);
        Ok(bytes)
    }

    pub fn finish(&mut self) -> Result<Vec<u8>> {
        let tail = match self.resampler.as_mut() {
            Some(resampler) => resampler.drain()?,
            None => return Ok(Vec::new()),
        };
        let mut bytes = Vec::with_capacity(tail.len() * 2);
        extend_le_bytes(&mut bytes, &tail);
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_input_is_passthrough() {
        let mut normalizer = Normalizer::new(StreamInfo::CANONICAL).unwrap();
        let bytes = normalizer.process(&[1, -1, 2, -2]).unwrap();
        assert_eq!(bytes, vec![1, 0, 0xff, 0xff, 2, 0, 0xfe, 0xff]);
        assert!(normalizer.finish().unwrap().is_empty());
    }

    #[test]
    fn test_mono_is_duplicated() {
        let mut normalizer = Normalizer::new(StreamInfo {
            sample_rate: SAMPLE_RATE,
            channels: 1,
        })
        .unwrap();
        let bytes = normalizer.process(&[5, 6]).unwrap();
        assert_eq!(bytes.len(), 8);
    }

    #[test]
    fn test_resampling_keeps_duration() {
        let mut resampler = Resampler::new(44_100, SAMPLE_RATE).unwrap();
        let one_second = vec![0i16; 44_100 * 2];
        let mut out = resampler.process(&one_second).unwrap();
        out.extend(resampler.drain().unwrap());
        let frames = out.len() / 2;
        assert!(
            (47_000..=49_000).contains(&frames),
            "unexpected frame count {frames}"
        );
    }
}
