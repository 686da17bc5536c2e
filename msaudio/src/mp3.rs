//! MPEG layer III decoding (minimp3).

use minimp3::{Decoder as MiniMp3Decoder, Error as MiniMp3Error};
use tokio::io::AsyncRead;

use crate::{
    common::spawn_pcm_pipeline,
    error::{AudioError, Result},
    pcm::StreamInfo,
    stream::PcmStream,
};

/// Decodes an MP3 byte stream into canonical PCM.
///
/// Junk before the first frame (ID3 tags, partial frames) is skipped.
pub async fn decode_mp3<R>(reader: R) -> Result<PcmStream>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    spawn_pcm_pipeline(reader, "mp3-decode", |input, sink| {
        let mut decoder = MiniMp3Decoder::new(input);
        loop {
            match decoder.next_frame() {
                Ok(frame) => {
                    if frame.channels == 0 {
                        return Err(AudioError::Decode("MP3 frame reported zero channels".into()));
                    }
                    let info = StreamInfo {
                        sample_rate: frame.sample_rate as u32,
                        channels: frame.channels as u8,
                    };
                    if !sink.push(info, &frame.data)? {
                        return Ok(());
                    }
                }
                Err(MiniMp3Error::Eof) => return Ok(()),
                Err(MiniMp3Error::InsufficientData) | Err(MiniMp3Error::SkippedData) => continue,
                Err(MiniMp3Error::Io(err)) => return Err(err.into()),
            }
        }
    })
    .await
}
