//! WebM/Opus decoding.
//!
//! A demuxer thread (symphonia, Matroska) pulls the Opus packets out of the
//! container and pushes them into a bounded pipe consumed by the Opus
//! decoder.

use std::io::{ErrorKind, Read};

use crossbeam_channel::{bounded, Sender};
use opus::{Channels, Decoder as OpusDecoder};
use symphonia::core::{
    codecs::{CODEC_TYPE_NULL, CODEC_TYPE_OPUS},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
};
use tokio::io::AsyncRead;
use tracing::{debug, warn};

use crate::{
    common::spawn_pcm_pipeline,
    error::{AudioError, Result},
    pcm::{StreamInfo, SAMPLE_RATE},
    seeker::BufferedReadSeeker,
    stream::PcmStream,
};

const PACKET_PIPE: usize = 64;

/// 120 ms, the longest Opus frame, per channel.
const MAX_OPUS_FRAME: usize = 5760;

fn demux<R>(input: R, packets: Sender<Result<Vec<u8>>>)
where
    R: Read + Send + Sync + 'static,
{
    if let Err(err) = demux_inner(input, &packets) {
        let _ = packets.send(Err(err));
    }
}

fn demux_inner<R>(input: R, packets: &Sender<Result<Vec<u8>>>) -> Result<()>
where
    R: Read + Send + Sync + 'static,
{
    let source = MediaSourceStream::new(
        Box::new(BufferedReadSeeker::new(input)),
        MediaSourceStreamOptions::default(),
    );
    let mut hint = Hint::new();
    hint.with_extension("webm");
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AudioError::Decode(format!("webm probe: {e}")))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec == CODEC_TYPE_OPUS)
        .or_else(|| {
            format
                .tracks()
                .iter()
                .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        })
        .ok_or_else(|| AudioError::Decode("webm: no audio track".into()))?;
    if track.codec_params.codec != CODEC_TYPE_OPUS {
        return Err(AudioError::Unsupported(format!(
            "webm track codec {}",
            track.codec_params.codec
        )));
    }
    let track_id = track.id;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::ResetRequired) => continue,
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                return Ok(());
            }
            Err(e) => return Err(AudioError::Decode(format!("webm demux: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }
        if packets.send(Ok(packet.data.into_vec())).is_err() {
            debug!("webm: decoder gone, demuxer stops");
            return Ok(());
        }
    }
}

/// Decodes a WebM/Opus byte stream into canonical PCM.
pub async fn decode_webm<R>(reader: R) -> Result<PcmStream>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    spawn_pcm_pipeline(reader, "webm-decode", |input, sink| {
        let (tx, rx) = bounded(PACKET_PIPE);
        let demuxer = std::thread::Builder::new()
            .name("webm-demux".into())
            .spawn(move || demux(input, tx))?;

        let mut decoder = OpusDecoder::new(SAMPLE_RATE, Channels::Stereo)
            .map_err(|e| AudioError::Decode(format!("opus init: {e}")))?;
        let mut pcm = vec![0i16; MAX_OPUS_FRAME * 2];
        let info = StreamInfo::CANONICAL;

        let outcome = (|| -> Result<()> {
            for packet in rx.iter() {
                let packet = packet?;
                let frames = match decoder.decode(&packet, &mut pcm, false) {
                    Ok(frames) => frames,
                    Err(e) => {
                        warn!("opus: dropping undecodable packet: {e}");
                        continue;
                    }
                };
                if !sink.push(info, &pcm[..frames * 2])? {
                    break;
                }
            }
            Ok(())
        })();

        drop(rx);
        if demuxer.join().is_err() {
            warn!("webm demuxer thread panicked");
        }
        outcome
    })
    .await
}
