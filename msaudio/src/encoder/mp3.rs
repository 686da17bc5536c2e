use bytes::Bytes;
use mp3lame_encoder::{Bitrate, Builder, Encoder, FlushNoGap, InterleavedPcm, Quality};

use super::StreamEncoder;
use crate::{
    error::{AudioError, Result},
    pcm::{bytes_to_samples, frames_in, CHANNELS, SAMPLE_RATE},
};

/// Frames per MPEG-1 layer III frame; input is fed in multiples of this.
pub const MPEG_FRAME_SAMPLES: usize = 1152;

fn build_lame() -> Result<Encoder> {
    Builder::new()
        .ok_or_else(|| AudioError::encode("failed to create LAME encoder"))?
        .with_num_channels(CHANNELS)
        .map_err(|e| AudioError::encode(format!("LAME set_num_channels failed: {e:?}")))?
        .with_sample_rate(SAMPLE_RATE)
        .map_err(|e| AudioError::encode(format!("LAME set_sample_rate failed: {e:?}")))?
        .with_brate(Bitrate::Kbps320)
        .map_err(|e| AudioError::encode(format!("LAME set_brate failed: {e:?}")))?
        .with_quality(Quality::Best)
        .map_err(|e| AudioError::encode(format!("LAME set_quality failed: {e:?}")))?
        .build()
        .map_err(|e| AudioError::encode(format!("LAME build failed: {e:?}")))
}

fn lame_encode(lame: &mut Encoder, samples: &[i16], out: &mut Vec<u8>) -> Result<usize> {
    out.reserve(mp3lame_encoder::max_required_buffer_size(samples.len() / 2));
    let written = lame
        .encode(InterleavedPcm(samples), out.spare_capacity_mut())
        .map_err(|e| AudioError::encode(format!("LAME encode failed: {e:?}")))?;
    // SAFETY: encode filled exactly `written` bytes into spare capacity.
    unsafe { out.set_len(out.len() + written) };
    Ok(written)
}

/// A few frames of digital silence from a throwaway encoder.
fn silent_frames() -> Result<Bytes> {
    let mut lame = build_lame()?;
    let mut buf = Vec::new();
    lame_encode(&mut lame, &[0i16; MPEG_FRAME_SAMPLES * 2], &mut buf)?;
    buf.reserve(mp3lame_encoder::max_required_buffer_size(MPEG_FRAME_SAMPLES));
    let flushed = lame
        .flush::<FlushNoGap>(buf.spare_capacity_mut())
        .map_err(|e| AudioError::encode(format!("LAME flush failed: {e:?}")))?;
    // SAFETY: flush filled exactly `flushed` bytes into spare capacity.
    unsafe { buf.set_len(buf.len() + flushed) };

    // on démarre sur une synchro de trame
    let start = buf
        .windows(2)
        .position(|w| w[0] == 0xFF && w[1] & 0xE0 == 0xE0)
        .ok_or_else(|| AudioError::encode("LAME produced no frame sync"))?;
    Ok(Bytes::copy_from_slice(&buf[start..]))
}

/// MPEG layer III encoder, 48 kHz stereo, 320 kbps CBR.
pub struct Mp3StreamEncoder {
    lame: Encoder,
    pending: Vec<i16>,
    header: Bytes,
    frames: u64,
}

impl Mp3StreamEncoder {
    pub fn new() -> Result<Self> {
        Ok(Self {
            lame: build_lame()?,
            pending: Vec::with_capacity(MPEG_FRAME_SAMPLES * 4),
            header: silent_frames()?,
            frames: 0,
        })
    }
}

impl StreamEncoder for Mp3StreamEncoder {
    fn name(&self) -> &'static str {
        "mpeg"
    }

    fn content_type(&self) -> &'static str {
        "audio/mpeg"
    }

    fn encode(&mut self, pcm: &[u8], out: &mut Vec<u8>) -> Result<usize> {
        self.frames += frames_in(pcm.len());
        self.pending.extend(bytes_to_samples(pcm));

        let aligned = self.pending.len() / (MPEG_FRAME_SAMPLES * 2) * (MPEG_FRAME_SAMPLES * 2);
        if aligned == 0 {
            return Ok(0);
        }
        let written = lame_encode(&mut self.lame, &self.pending[..aligned], out)?;
        self.pending.drain(..aligned);
        Ok(written)
    }

    fn granule_pos(&self) -> u64 {
        self.frames
    }

    fn warmup_header(&self) -> &Bytes {
        &self.header
    }
}
