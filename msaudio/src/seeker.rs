//! Forward-only source made seekable for demuxers that probe backwards.

use std::io::{self, Read, Seek, SeekFrom};

use symphonia::core::io::MediaSource;

const READ_CHUNK: usize = 8 * 1024;

/// Keeps every byte read from `inner` so earlier positions can be revisited.
///
/// Seeking forward past the buffered data reads the gap; a target beyond the
/// end of the stream is kept and reads there report end of file.
/// `SeekFrom::End` is not supported since the total length is unknown.
pub struct BufferedReadSeeker<R> {
    inner: R,
    buffer: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl<R: Read> BufferedReadSeeker<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            pos: 0,
            eof: false,
        }
    }

    /// Bytes pulled from the underlying reader so far.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn fill_to(&mut self, target: usize) -> io::Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        while self.buffer.len() < target && !self.eof {
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                self.eof = true;
            } else {
                self.buffer.extend_from_slice(&chunk[..n]);
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for BufferedReadSeeker<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pos >= self.buffer.len() {
            self.fill_to(self.pos + 1)?;
        }
        let available = self.buffer.len().saturating_sub(self.pos);
        if available == 0 {
            return Ok(0);
        }
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&self.buffer[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl<R: Read> Seek for BufferedReadSeeker<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
            SeekFrom::End(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "seeking from the end of a live stream",
                ))
            }
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }
        let target = usize::try_from(target)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "seek offset overflow"))?;
        self.fill_to(target)?;
        // au-delà de la fin : les lectures rendront 0
        self.pos = target;
        Ok(target as u64)
    }
}

impl<R: Read + Send + Sync> MediaSource for BufferedReadSeeker<R> {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_seek_back_after_read() {
        let mut seeker = BufferedReadSeeker::new(Cursor::new(b"abcdefgh".to_vec()));
        let mut buf = [0u8; 4];
        seeker.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abcd");
        seeker.seek(SeekFrom::Start(1)).unwrap();
        seeker.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"bcde");
        assert_eq!(seeker.seek(SeekFrom::Current(-2)).unwrap(), 3);
    }

    #[test]
    fn test_seek_forward_reads_gap() {
        let mut seeker = BufferedReadSeeker::new(Cursor::new(b"0123456789".to_vec()));
        assert_eq!(seeker.seek(SeekFrom::Start(7)).unwrap(), 7);
        assert_eq!(seeker.buffered_len(), 10);
        let mut rest = Vec::new();
        seeker.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"789");
    }

    #[test]
    fn test_seek_past_eof_keeps_target() {
        let mut seeker = BufferedReadSeeker::new(Cursor::new(b"0123".to_vec()));
        assert_eq!(seeker.seek(SeekFrom::Start(10)).unwrap(), 10);
        assert_eq!(seeker.buffered_len(), 4);
        let mut buf = [0u8; 4];
        assert_eq!(seeker.read(&mut buf).unwrap(), 0);
        assert_eq!(seeker.seek(SeekFrom::Current(0)).unwrap(), 10);

        assert_eq!(seeker.seek(SeekFrom::Current(-8)).unwrap(), 2);
        assert_eq!(seeker.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"23");
    }

    #[test]
    fn test_seek_from_end_is_unsupported() {
        let mut seeker = BufferedReadSeeker::new(Cursor::new(Vec::new()));
        let err = seeker.seek(SeekFrom::End(0)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        assert!(seeker.seek(SeekFrom::Current(-1)).is_err());
    }
}
