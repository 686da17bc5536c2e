//! Ogg/Vorbis decoding (lewton), chained streams included.

use lewton::{
    audio::{read_audio_packet_generic, PreviousWindowRight},
    header::{read_header_comment, read_header_ident, read_header_setup, IdentHeader, SetupHeader},
    samples::InterleavedSamples,
};
use tokio::io::AsyncRead;
use tracing::{debug, warn};

use crate::{
    common::spawn_pcm_pipeline,
    error::{AudioError, Result},
    ogg::OggPacketReader,
    pcm::StreamInfo,
    stream::PcmStream,
};

struct VorbisState {
    ident: IdentHeader,
    setup: SetupHeader,
    window: PreviousWindowRight,
}

impl VorbisState {
    fn from_headers(headers: &[Vec<u8>]) -> Result<Self> {
        let ident = read_header_ident(&headers[0])
            .map_err(|e| AudioError::Decode(format!("vorbis ident header: {e}")))?;
        read_header_comment(&headers[1])
            .map_err(|e| AudioError::Decode(format!("vorbis comment header: {e}")))?;
        let setup = read_header_setup(
            &headers[2],
            ident.audio_channels,
            (ident.blocksize_0, ident.blocksize_1),
        )
        .map_err(|e| AudioError::Decode(format!("vorbis setup header: {e}")))?;
        Ok(Self {
            ident,
            setup,
            window: PreviousWindowRight::new(),
        })
    }

    fn info(&self) -> StreamInfo {
        StreamInfo {
            sample_rate: self.ident.audio_sample_rate,
            channels: self.ident.audio_channels,
        }
    }
}

/// Decodes an Ogg/Vorbis byte stream into canonical PCM.
pub async fn decode_vorbis<R>(reader: R) -> Result<PcmStream>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    spawn_pcm_pipeline(reader, "vorbis-decode", |input, sink| {
        let mut packets = OggPacketReader::new(input);
        let mut headers: Vec<Vec<u8>> = Vec::with_capacity(3);
        let mut state: Option<VorbisState> = None;

        while let Some(packet) = packets.next_packet()? {
            if packet.starts_stream {
                if state.is_some() {
                    debug!(serial = packet.serial, "vorbis: new chained stream");
                }
                state = None;
                headers.clear();
            }

            if state.is_none() {
                headers.push(packet.data);
                if headers.len() == 3 {
                    state = Some(VorbisState::from_headers(&headers)?);
                    headers.clear();
                }
                continue;
            }
            let Some(current) = state.as_mut() else {
                continue;
            };

            let decoded: InterleavedSamples<i16> = match read_audio_packet_generic(
                &current.ident,
                &current.setup,
                &packet.data,
                &mut current.window,
            ) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!("vorbis: dropping undecodable packet: {e}");
                    continue;
                }
            };
            if decoded.samples.is_empty() {
                continue;
            }
            if !sink.push(current.info(), &decoded.samples)? {
                return Ok(());
            }
        }
        Ok(())
    })
    .await
}
