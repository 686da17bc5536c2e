use tokio::io::AsyncRead;
use tracing::debug;

use crate::{
    error::Result, format::StreamFormat, mp3::decode_mp3, pcm::StreamInfo, stream::PcmStream,
    vorbis::decode_vorbis, webm::decode_webm,
};

/// Opens the decoder matching `format` on top of `reader`.
///
/// [`StreamFormat::Raw`] is taken as canonical PCM and passed through.
pub async fn decode_stream<R>(reader: R, format: StreamFormat) -> Result<PcmStream>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    debug!(%format, "opening decoder");
    match format {
        StreamFormat::Raw => Ok(PcmStream::new(StreamInfo::CANONICAL, reader)),
        StreamFormat::Mp3 => decode_mp3(reader).await,
        StreamFormat::WebM => decode_webm(reader).await,
        StreamFormat::Vorbis => decode_vorbis(reader).await,
    }
}
