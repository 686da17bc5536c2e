//! Plumbing shared by the decoders.
//!
//! Every decoder runs the same three-stage pipeline:
//!
//! ```text
//! source → [ingest task] → mpsc → [blocking decoder] → mpsc → [writer task] → duplex → PcmStream
//! ```
//!
//! The blocking stage sees the compressed bytes through [`ChannelReader`]
//! and hands decoded samples to a [`PcmSink`], which normalises them to the
//! canonical layout.

use std::io::{self, Read};

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream},
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    error::{AudioError, Result},
    pcm::StreamInfo,
    resample::Normalizer,
    stream::{ManagedAsyncReader, PcmStream},
};

/// Size of chunks when reading input data.
pub(crate) const INGEST_CHUNK_SIZE: usize = 16 * 1024;

/// Channel capacity between pipeline stages.
pub(crate) const CHANNEL_CAPACITY: usize = 8;

/// Size of the duplex buffer for PCM output (256 KB).
pub(crate) const DUPLEX_BUFFER_SIZE: usize = 256 * 1024;

/// Bridges an async channel of byte chunks to a synchronous `Read`.
///
/// Must only be used from a blocking thread (`blocking_recv`).
pub(crate) struct ChannelReader {
    rx: mpsc::Receiver<Result<Bytes>>,
    current: Bytes,
    offset: usize,
    finished: bool,
}

impl ChannelReader {
    pub fn new(rx: mpsc::Receiver<Result<Bytes>>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
            offset: 0,
            finished: false,
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.offset < self.current.len() {
                let n = buf.len().min(self.current.len() - self.offset);
                buf[..n].copy_from_slice(&self.current[self.offset..self.offset + n]);
                self.offset += n;
                return Ok(n);
            }

            if self.finished {
                return Ok(0);
            }

            match self.rx.blocking_recv() {
                Some(Ok(bytes)) => {
                    if bytes.is_empty() {
                        continue;
                    }
                    self.current = bytes;
                    self.offset = 0;
                }
                Some(Err(err)) => {
                    self.finished = true;
                    return Err(err.into());
                }
                None => {
                    self.finished = true;
                    return Ok(0);
                }
            }
        }
    }
}

/// Reads `reader` in chunks and forwards them to the decoder stage.
pub(crate) fn spawn_ingest_task<R>(reader: R, ingest_tx: mpsc::Sender<Result<Bytes>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = tokio::io::BufReader::new(reader);
        let mut buf = vec![0u8; INGEST_CHUNK_SIZE];

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    if ingest_tx.send(Ok(chunk)).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = ingest_tx.send(Err(AudioError::from(err))).await;
                    break;
                }
            }
        }
    })
}

/// Copies PCM chunks into the duplex stream, then reports the decoder outcome.
pub(crate) fn spawn_writer_task(
    mut pcm_rx: mpsc::Receiver<Result<Vec<u8>>>,
    mut pcm_writer: DuplexStream,
    blocking_handle: JoinHandle<Result<()>>,
    role: &'static str,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        while let Some(chunk_result) = pcm_rx.recv().await {
            let chunk = chunk_result?;
            if chunk.is_empty() {
                continue;
            }
            pcm_writer.write_all(&chunk).await?;
        }
        pcm_writer.shutdown().await?;
        match blocking_handle.await {
            Ok(res) => res,
            Err(err) => Err(AudioError::TaskJoin {
                role,
                details: err.to_string(),
            }),
        }
    })
}

/// Receives decoded samples in the blocking stage.
pub(crate) struct PcmSink {
    tx: mpsc::Sender<Result<Vec<u8>>>,
    info_tx: Option<oneshot::Sender<Result<StreamInfo>>>,
    normalizer: Option<Normalizer>,
}

impl PcmSink {
    fn new(tx: mpsc::Sender<Result<Vec<u8>>>, info_tx: oneshot::Sender<Result<StreamInfo>>) -> Self {
        Self {
            tx,
            info_tx: Some(info_tx),
            normalizer: None,
        }
    }

    fn send(&self, bytes: Vec<u8>) -> bool {
        bytes.is_empty() || self.tx.blocking_send(Ok(bytes)).is_ok()
    }

    /// Pushes interleaved samples described by `info`.
    ///
    /// Returns `Ok(false)` once the consumer is gone.
    pub fn push(&mut self, info: StreamInfo, samples: &[i16]) -> Result<bool> {
        if info.channels == 0 || info.sample_rate == 0 {
            return Err(AudioError::Decode(format!("invalid stream layout {info:?}")));
        }
        if let Some(tx) = self.info_tx.take() {
            if tx.send(Ok(info)).is_err() {
                return Ok(false);
            }
        }

        if self.normalizer.as_ref().map(Normalizer::input) != Some(info) {
            if let Some(mut previous) = self.normalizer.take() {
                if !self.send(previous.finish()?) {
                    return Ok(false);
                }
            }
            self.normalizer = Some(Normalizer::new(info)?);
        }

        let bytes = match self.normalizer.as_mut() {
            Some(normalizer) => normalizer.process(samples)?,
            None => return Ok(true),
        };
        Ok(self.send(bytes))
    }

    fn fail(&mut self, err: &AudioError) {
        if let Some(tx) = self.info_tx.take() {
            let _ = tx.send(Err(err.clone()));
        }
    }

    fn finish(mut self) -> Result<()> {
        if self.info_tx.is_some() {
            let err = AudioError::Decode("stream contained no decodable audio".into());
            self.fail(&err);
            return Err(err);
        }
        if let Some(mut normalizer) = self.normalizer.take() {
            self.send(normalizer.finish()?);
        }
        Ok(())
    }
}

/// Runs `decode` in a blocking thread fed by `reader`.
///
/// Resolves once the decoder has produced its first samples (or failed).
pub(crate) async fn spawn_pcm_pipeline<R, F>(reader: R, role: &'static str, decode: F) -> Result<PcmStream>
where
    R: AsyncRead + Unpin + Send + 'static,
    F: FnOnce(ChannelReader, &mut PcmSink) -> Result<()> + Send + 'static,
{
    let (ingest_tx, ingest_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let ingest = spawn_ingest_task(reader, ingest_tx);

    let (pcm_tx, pcm_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (pcm_reader, pcm_writer) = tokio::io::duplex(DUPLEX_BUFFER_SIZE);
    let (info_tx, info_rx) = oneshot::channel::<Result<StreamInfo>>();

    let blocking_handle = tokio::task::spawn_blocking(move || -> Result<()> {
        let mut sink = PcmSink::new(pcm_tx, info_tx);
        match decode(ChannelReader::new(ingest_rx), &mut sink) {
            Ok(()) => sink.finish(),
            Err(err) => {
                sink.fail(&err);
                Err(err)
            }
        }
    });

    let writer_handle = spawn_writer_task(pcm_rx, pcm_writer, blocking_handle, role);
    let reader = ManagedAsyncReader::new(role, pcm_reader, writer_handle).with_task(ingest);

    let info = info_rx.await.map_err(|_| AudioError::ChannelClosed)??;
    Ok(PcmStream::new(info, reader))
}
