use std::{
    future::Future,
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::{
    io::{AsyncRead, DuplexStream, ReadBuf},
    task::JoinHandle,
};
use tracing::debug;

use crate::{error::AudioError, pcm::StreamInfo};

/// Async reader backed by spawned tasks writing into it.
///
/// Dropping the reader aborts the producer tasks. A failure of the producer
/// surfaces as an error at end of stream instead of a silent EOF.
pub struct ManagedAsyncReader {
    inner: Option<DuplexStream>,
    join: Option<JoinHandle<Result<(), AudioError>>>,
    aux: Vec<JoinHandle<()>>,
    role: &'static str,
}

impl ManagedAsyncReader {
    pub fn new(
        role: &'static str,
        inner: DuplexStream,
        join: JoinHandle<Result<(), AudioError>>,
    ) -> Self {
        Self {
            inner: Some(inner),
            join: Some(join),
            aux: Vec::new(),
            role,
        }
    }

    /// Attaches a helper task aborted together with the reader.
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.aux.push(task);
        self
    }

    /// Waits for the producer task to finish.
    pub async fn wait(mut self) -> Result<(), AudioError> {
        match self.join.take() {
            Some(handle) => match handle.await {
                Ok(res) => res,
                Err(err) => Err(AudioError::TaskJoin {
                    role: self.role,
                    details: err.to_string(),
                }),
            },
            None => Ok(()),
        }
    }

    fn poll_producer(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let Some(handle) = self.join.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let outcome = match Pin::new(handle).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(outcome) => outcome,
        };
        self.join = None;
        match outcome {
            Ok(Ok(())) => Poll::Ready(Ok(())),
            Ok(Err(err)) => Poll::Ready(Err(err.into())),
            Err(err) => Poll::Ready(Err(AudioError::TaskJoin {
                role: self.role,
                details: err.to_string(),
            }
            .into())),
        }
    }
}

impl AsyncRead for ManagedAsyncReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let before = buf.filled().len();
        let inner = this
            .inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "reader dropped"))?;
        match Pin::new(inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if buf.filled().len() == before && buf.remaining() > 0 => {
                // EOF côté duplex : on remonte l'issue du producteur
                this.poll_producer(cx)
            }
            other => other,
        }
    }
}

impl Drop for ManagedAsyncReader {
    fn drop(&mut self) {
        if let Some(handle) = self.join.take() {
            handle.abort();
        }
        for task in self.aux.drain(..) {
            task.abort();
        }
        self.inner.take();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Latch {
    Open,
    Failed,
    Closed,
}

/// Canonical PCM stream (s16le, stereo, 48 kHz) produced by the decoder chain.
///
/// The first error is returned once; afterwards the stream reads as EOF.
/// [`PcmStream::close`] may be called any number of times.
pub struct PcmStream {
    source: StreamInfo,
    inner: Option<Box<dyn AsyncRead + Send + Unpin>>,
    latch: Latch,
}

impl PcmStream {
    pub fn new<R>(source: StreamInfo, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            source,
            inner: Some(Box::new(reader)),
            latch: Latch::Open,
        }
    }

    /// Format of the audio before normalisation.
    pub fn source_info(&self) -> StreamInfo {
        self.source
    }

    /// True once an error has been reported.
    pub fn has_failed(&self) -> bool {
        self.latch == Latch::Failed
    }

    /// Releases the decoding pipeline.
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            debug!("pcm stream closed");
        }
        if self.latch == Latch::Open {
            self.latch = Latch::Closed;
        }
    }
}

impl AsyncRead for PcmStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        match Pin::new(inner).poll_read(cx, buf) {
            Poll::Ready(Err(err)) => {
                this.inner = None;
                this.latch = Latch::Failed;
                Poll::Ready(Err(err))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "boom")))
        }
    }

    #[tokio::test]
    async fn test_error_is_latched_as_eof() {
        let mut stream = PcmStream::new(StreamInfo::CANONICAL, FailingReader);
        let mut buf = [0u8; 16];
        assert!(stream.read(&mut buf).await.is_err());
        assert!(stream.has_failed());
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut stream = PcmStream::new(StreamInfo::CANONICAL, &b"\x01\x02\x03\x04"[..]);
        stream.close();
        stream.close();
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
        assert!(!stream.has_failed());
    }

    #[tokio::test]
    async fn test_producer_error_surfaces_at_eof() {
        let (reader, writer) = tokio::io::duplex(64);
        let join = tokio::spawn(async move {
            drop(writer);
            Err(AudioError::Decode("corrupt frame".into()))
        });
        let mut managed = ManagedAsyncReader::new("test", reader, join);
        let mut out = Vec::new();
        let err = managed.read_to_end(&mut out).await.unwrap_err();
        assert!(err.to_string().contains("corrupt frame"));
    }
}
