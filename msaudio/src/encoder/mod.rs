//! Broadcast encoders.
//!
//! Both encoders absorb canonical PCM and return container output that is
//! self-contained at chunk boundaries: whole Ogg pages for Vorbis, whole
//! frames for MPEG.

mod mp3;
mod vorbis;

use bytes::Bytes;

pub use mp3::Mp3StreamEncoder;
pub use vorbis::VorbisStreamEncoder;

use crate::error::Result;

pub trait StreamEncoder {
    /// Short name used in logs (`"vorbis"`, `"mpeg"`).
    fn name(&self) -> &'static str;

    /// `Content-Type` of the produced stream.
    fn content_type(&self) -> &'static str;

    /// Absorbs canonical PCM bytes and appends encoded output to `out`.
    ///
    /// Returns the number of bytes appended, possibly zero.
    fn encode(&mut self, pcm: &[u8], out: &mut Vec<u8>) -> Result<usize>;

    /// Sample frames absorbed since creation.
    fn granule_pos(&self) -> u64;

    /// Bytes a new listener needs before any chunk.
    fn warmup_header(&self) -> &Bytes;
}

/// Splits interleaved stereo s16le bytes into two planar f32 channels.
pub(crate) fn deinterleave(pcm: &[u8], left: &mut Vec<f32>, right: &mut Vec<f32>) {
    left.clear();
    right.clear();
    for frame in pcm.chunks_exact(4) {
        left.push(i16::from_le_bytes([frame[0], frame[1]]) as f32 / 32768.0);
        right.push(i16::from_le_bytes([frame[2], frame[3]]) as f32 / 32768.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ogg::OggPacketReader;
    use crate::pcm::PCM_WINDOW_BYTES;
    use std::io::Cursor;

    #[test]
    fn test_vorbis_warmup_header_is_decodable() {
        let encoder = VorbisStreamEncoder::new().unwrap();
        let header = encoder.warmup_header().clone();
        assert_eq!(&header[..4], b"OggS");

        let mut packets = OggPacketReader::new(Cursor::new(header.to_vec()));
        let ident = packets.next_packet().unwrap().unwrap();
        assert!(ident.starts_stream);
        let ident = lewton::header::read_header_ident(&ident.data).unwrap();
        assert_eq!(ident.audio_channels, 2);
        assert_eq!(ident.audio_sample_rate, 48_000);
        let comment = packets.next_packet().unwrap().unwrap();
        lewton::header::read_header_comment(&comment.data).unwrap();
        let setup = packets.next_packet().unwrap().unwrap();
        lewton::header::read_header_setup(
            &setup.data,
            ident.audio_channels,
            (ident.blocksize_0, ident.blocksize_1),
        )
        .unwrap();
    }

    #[test]
    fn test_vorbis_granule_counts_frames() {
        let mut encoder = VorbisStreamEncoder::new().unwrap();
        let mut out = Vec::new();
        for _ in 0..50 {
            encoder
                .encode(&[0u8; PCM_WINDOW_BYTES], &mut out)
                .unwrap();
        }
        assert_eq!(encoder.granule_pos(), 50 * 960);
        assert!(!out.is_empty());
        assert_eq!(&out[..4], b"OggS");
    }

    #[test]
    fn test_mp3_output_is_frame_aligned() {
        let mut encoder = Mp3StreamEncoder::new().unwrap();
        assert_eq!(encoder.warmup_header()[0], 0xFF);

        let mut out = Vec::new();
        let mut total = 0;
        for _ in 0..100 {
            total += encoder.encode(&[0u8; PCM_WINDOW_BYTES], &mut out).unwrap();
        }
        assert_eq!(total, out.len());
        assert_eq!(encoder.granule_pos(), 100 * 960);
        assert_eq!(out[0], 0xFF);
        assert_eq!(out[1] & 0xE0, 0xE0);
    }
}
