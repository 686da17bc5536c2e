//! # msaudio
//!
//! Audio plumbing of the MusicStream broadcast pipeline:
//!
//! - **Decoder chain**: MP3, WebM/Opus and Ogg/Vorbis byte streams are turned
//!   into canonical PCM (s16le, stereo, 48 kHz), resampled when needed.
//!   Raw PCM is passed through.
//! - **Encoders**: Ogg/Vorbis and MPEG layer III, both fed by the pacer.
//!
//! ```no_run
//! use msaudio::{decode_stream, StreamFormat};
//! use tokio::io::AsyncReadExt;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let file = tokio::fs::File::open("song.mp3").await?;
//! let mut pcm = decode_stream(file, StreamFormat::Mp3).await?;
//! let mut window = vec![0u8; msaudio::PCM_WINDOW_BYTES];
//! pcm.read_exact(&mut window).await?;
//! # Ok(())
//! # }
//! ```

mod common;
mod decode;
pub mod encoder;
mod error;
mod format;
mod mp3;
mod ogg;
pub mod pcm;
mod resample;
mod seeker;
mod stream;
mod vorbis;
mod webm;

pub use decode::decode_stream;
pub use encoder::{Mp3StreamEncoder, StreamEncoder, VorbisStreamEncoder};
pub use error::{AudioError, Result};
pub use format::StreamFormat;
pub use mp3::decode_mp3;
pub use pcm::{StreamInfo, PCM_WINDOW, PCM_WINDOW_BYTES, SAMPLE_RATE};
pub use resample::{Normalizer, Resampler};
pub use seeker::BufferedReadSeeker;
pub use stream::{ManagedAsyncReader, PcmStream};
pub use vorbis::decode_vorbis;
pub use webm::decode_webm;
