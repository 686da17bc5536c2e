use std::{
    io::{self, Write},
    num::{NonZeroU32, NonZeroU8},
    sync::{Arc, Mutex, PoisonError},
};

use bytes::Bytes;
use vorbis_rs::{VorbisBitrateManagementStrategy, VorbisEncoder, VorbisEncoderBuilder};

use super::{deinterleave, StreamEncoder};
use crate::{
    error::{AudioError, Result},
    pcm::{frames_in, CHANNELS, SAMPLE_RATE},
};

/// Average bitrate of the Vorbis stream.
pub const VORBIS_BITRATE: u32 = 320_000;

/// Write target collecting the pages produced by libvorbis.
#[derive(Clone, Default)]
struct PageSink(Arc<Mutex<Vec<u8>>>);

impl PageSink {
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Write for PageSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Ogg/Vorbis encoder, 48 kHz stereo, ABR.
pub struct VorbisStreamEncoder {
    encoder: VorbisEncoder<PageSink>,
    sink: PageSink,
    header: Bytes,
    frames: u64,
    planar: [Vec<f32>; 2],
}

impl VorbisStreamEncoder {
    pub fn new() -> Result<Self> {
        let rate = NonZeroU32::new(SAMPLE_RATE).ok_or_else(|| AudioError::encode("zero rate"))?;
        let channels =
            NonZeroU8::new(CHANNELS).ok_or_else(|| AudioError::encode("zero channels"))?;
        let average_bitrate = NonZeroU32::new(VORBIS_BITRATE)
            .ok_or_else(|| AudioError::encode("zero bitrate"))?;

        let sink = PageSink::default();
        let mut builder = VorbisEncoderBuilder::new(rate, channels, sink.clone())
            .map_err(|e| AudioError::encode(format!("vorbis init: {e}")))?;
        builder.bitrate_management_strategy(VorbisBitrateManagementStrategy::Abr {
            average_bitrate,
        });
        let encoder = builder
            .build()
            .map_err(|e| AudioError::encode(format!("vorbis build: {e}")))?;

        // les pages d'en-tête sont écrites dès la construction
        let header = sink.take();
        if header.is_empty() {
            return Err(AudioError::encode("vorbis produced no header pages"));
        }

        Ok(Self {
            encoder,
            sink,
            header: Bytes::from(header),
            frames: 0,
            planar: [Vec::new(), Vec::new()],
        })
    }
}

impl StreamEncoder for VorbisStreamEncoder {
    fn name(&self) -> &'static str {
        "vorbis"
    }

    fn content_type(&self) -> &'static str {
        "application/ogg"
    }

    fn encode(&mut self, pcm: &[u8], out: &mut Vec<u8>) -> Result<usize> {
        let [left, right] = &mut self.planar;
        deinterleave(pcm, left, right);
        if left.is_empty() {
            return Ok(0);
        }
        self.encoder
            .encode_audio_block(&self.planar)
            .map_err(|e| AudioError::encode(format!("vorbis encode: {e}")))?;
        self.frames += frames_in(pcm.len());

        let pages = self.sink.take();
        out.extend_from_slice(&pages);
        Ok(pages.len())
    }

    fn granule_pos(&self) -> u64 {
        self.frames
    }

    fn warmup_header(&self) -> &Bytes {
        &self.header
    }
}
