//! Producers: turn a decoded source into ticketed PCM windows for the pacer.

use std::{io, sync::Arc, time::Duration};

use bytes::Bytes;
use msaudio::{
    PCM_WINDOW_BYTES, PcmStream, decode_stream,
    pcm::FRAME_BYTES,
};
use msradio::RadioStation;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pacer::PacerMessage;

static SILENCE: [u8; PCM_WINDOW_BYTES] = [0; PCM_WINDOW_BYTES];

const RADIO_RETRY: Duration = Duration::from_secs(1);

/// Sending side of one producer run.
pub(crate) struct Feed {
    ticket: u64,
    tx: mpsc::Sender<PacerMessage>,
    quit: CancellationToken,
    silence_windows: usize,
}

impl Feed {
    pub(crate) fn new(
        ticket: u64,
        tx: mpsc::Sender<PacerMessage>,
        quit: CancellationToken,
        silence_windows: usize,
    ) -> Self {
        Self {
            ticket,
            tx,
            quit,
            silence_windows,
        }
    }

    /// False once the run was told to quit or the pacer is gone.
    async fn send(&self, message: PacerMessage) -> bool {
        tokio::select! {
            biased;
            _ = self.quit.cancelled() => false,
            sent = self.tx.send(message) => sent.is_ok(),
        }
    }

    async fn pcm(&self, data: Bytes) -> bool {
        self.send(PacerMessage::Pcm {
            ticket: self.ticket,
            data,
        })
        .await
    }

    async fn silence(&self) -> bool {
        for _ in 0..self.silence_windows {
            if !self.pcm(Bytes::from_static(&SILENCE)).await {
                return false;
            }
        }
        true
    }

    async fn track_start(&self) -> bool {
        self.send(PacerMessage::TrackStart {
            ticket: self.ticket,
        })
        .await
    }

    /// The sentinel goes out even after a quit so the scheduler always sees
    /// the end of the run.
    async fn finish(self) {
        let ticket = self.ticket;
        if self.tx.send(PacerMessage::EndOfStream { ticket }).await.is_err() {
            debug!(ticket, "producer: pacer gone before end of stream");
        }
    }

    fn quitting(&self) -> bool {
        self.quit.is_cancelled()
    }

    /// Forwards windows of `reader` until EOF, quit or a read error.
    async fn pump<R>(&self, reader: &mut R) -> io::Result<usize>
    where
        R: AsyncRead + Unpin,
    {
        let mut windows = 0;
        loop {
            let mut buffer = vec![0u8; PCM_WINDOW_BYTES];
            let read = tokio::select! {
                _ = self.quit.cancelled() => return Ok(windows),
                read = read_window(reader, &mut buffer) => read?,
            };
            let usable = read - read % FRAME_BYTES;
            if usable == 0 {
                return Ok(windows);
            }
            buffer.truncate(usable);
            if !self.pcm(Bytes::from(buffer)).await {
                return Ok(windows);
            }
            windows += 1;
        }
    }
}

/// Fills `buf` unless the stream ends first. Returns the bytes read.
async fn read_window<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Plays one decoded track: silence, track start, audio, silence, sentinel.
pub(crate) fn spawn_track(feed: Feed, title: String, mut pcm: PcmStream) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ticket = feed.ticket;
        if feed.silence().await && feed.track_start().await {
            match feed.pump(&mut pcm).await {
                Ok(windows) => debug!(ticket, windows, "producer: {} drained", title),
                // Une erreur de source termine simplement le morceau
                Err(e) => warn!(ticket, "producer: {} interrupted: {}", title, e),
            }
            pcm.close();
            if !feed.quitting() {
                feed.silence().await;
            }
        }
        feed.finish().await;
    })
}

/// Relays the radio stream until told to quit, reconnecting on failure.
pub(crate) fn spawn_radio(feed: Feed, radio: Arc<RadioStation>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ticket = feed.ticket;
        if feed.silence().await && feed.track_start().await {
            while !feed.quitting() {
                match open_radio(&radio).await {
                    Ok(mut pcm) => {
                        info!(ticket, "radio: stream opened");
                        match feed.pump(&mut pcm).await {
                            Ok(_) if feed.quitting() => break,
                            Ok(_) => warn!(ticket, "radio: stream ended"),
                            Err(e) => warn!(ticket, "radio: stream interrupted: {}", e),
                        }
                    }
                    Err(e) => warn!(ticket, "radio: cannot open stream: {}", e),
                }
                tokio::select! {
                    _ = feed.quit.cancelled() => break,
                    _ = tokio::time::sleep(RADIO_RETRY) => {}
                }
            }
        }
        feed.finish().await;
    })
}

async fn open_radio(radio: &RadioStation) -> crate::error::Result<PcmStream> {
    let source = radio.open_stream().await.map_err(mssource::MusicSourceError::from)?;
    Ok(decode_stream(source.reader, source.format).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use msaudio::StreamInfo;
    use std::io::Cursor;

    fn feed(quit: CancellationToken, silence: usize) -> (Feed, mpsc::Receiver<PacerMessage>) {
        let (tx, rx) = mpsc::channel(256);
        (Feed::new(7, tx, quit, silence), rx)
    }

    async fn collect(mut rx: mpsc::Receiver<PacerMessage>) -> Vec<PacerMessage> {
        let mut messages = Vec::new();
        while let Some(message) = rx.recv().await {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn test_track_layout() {
        let (feed, rx) = feed(CancellationToken::new(), 2);
        // 2.5 fenêtres plus un octet orphelin
        let bytes = vec![1u8; PCM_WINDOW_BYTES * 2 + PCM_WINDOW_BYTES / 2 + 1];
        let pcm = PcmStream::new(StreamInfo::CANONICAL, Cursor::new(bytes));
        spawn_track(feed, "fixture".into(), pcm).await.unwrap();

        let messages = collect(rx).await;
        let sizes: Vec<String> = messages
            .iter()
            .map(|m| match m {
                PacerMessage::Pcm { data, .. } if data[0] == 0 => "s".to_string(),
                PacerMessage::Pcm { data, .. } => data.len().to_string(),
                PacerMessage::TrackStart { .. } => "start".to_string(),
                PacerMessage::EndOfStream { .. } => "end".to_string(),
            })
            .collect();
        assert_eq!(
            sizes,
            vec!["s", "s", "start", "3840", "3840", "1920", "s", "s", "end"]
        );
    }

    #[tokio::test]
    async fn test_quit_still_sends_end_of_stream() {
        let quit = CancellationToken::new();
        let (feed, rx) = feed(quit.clone(), 1);
        quit.cancel();
        let pcm = PcmStream::new(StreamInfo::CANONICAL, Cursor::new(vec![1u8; 64]));
        spawn_track(feed, "fixture".into(), pcm).await.unwrap();

        let messages = collect(rx).await;
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], PacerMessage::EndOfStream { ticket: 7 }));
    }
}
