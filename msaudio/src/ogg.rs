//! Streaming Ogg page reader.
//!
//! Reads pages without seeking and hands back complete packets. Chained
//! streams (a new logical stream starting after the previous one ended, as
//! internet radios do at every song change) are reported through
//! [`OggPacket::starts_stream`]. Corrupt pages are dropped and the reader
//! resynchronises on the next capture pattern.

use std::{
    collections::VecDeque,
    io::{self, BufReader, Read},
};

use tracing::debug;

use crate::error::{AudioError, Result};

const CAPTURE: &[u8; 4] = b"OggS";
const HEADER_LEN: usize = 27;
const MAX_SYNC_SEARCH: usize = 64 * 1024;

const FLAG_CONTINUED: u8 = 0x01;
const FLAG_BOS: u8 = 0x02;
const FLAG_EOS: u8 = 0x04;

#[derive(Debug)]
pub(crate) struct OggPacket {
    pub data: Vec<u8>,
    pub serial: u32,
    /// First packet of a logical stream (header packets follow).
    pub starts_stream: bool,
}

pub(crate) struct OggPacketReader<R: Read> {
    reader: BufReader<R>,
    serial: Option<u32>,
    partial: Vec<u8>,
    fresh_stream: bool,
    ready: VecDeque<OggPacket>,
    finished: bool,
}

impl<R: Read> OggPacketReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            serial: None,
            partial: Vec::new(),
            fresh_stream: false,
            ready: VecDeque::new(),
            finished: false,
        }
    }

    pub fn next_packet(&mut self) -> Result<Option<OggPacket>> {
        loop {
            if let Some(packet) = self.ready.pop_front() {
                return Ok(Some(packet));
            }
            if self.finished {
                return Ok(None);
            }
            if !self.read_page()? {
                self.finished = true;
            }
        }
    }

    /// Reads until `buf` is full. Returns the number of bytes obtained.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }

    /// Positions the reader right after the next capture pattern.
    fn sync(&mut self) -> Result<bool> {
        let mut window = [0u8; 4];
        let mut scanned = 0usize;
        let mut byte = [0u8; 1];
        loop {
            if self.fill(&mut byte)? == 0 {
                return Ok(false);
            }
            window.rotate_left(1);
            window[3] = byte[0];
            scanned += 1;
            if scanned >= 4 && &window == CAPTURE {
                if scanned > 4 {
                    debug!(skipped = scanned - 4, "ogg: resynchronised");
                }
                return Ok(true);
            }
            if scanned > MAX_SYNC_SEARCH {
                return Err(AudioError::Decode(format!(
                    "no Ogg capture pattern in {MAX_SYNC_SEARCH} bytes"
                )));
            }
        }
    }

    fn read_page(&mut self) -> Result<bool> {
        if !self.sync()? {
            return Ok(false);
        }

        let mut header = [0u8; HEADER_LEN];
        header[..4].copy_from_slice(CAPTURE);
        if self.fill(&mut header[4..])? < HEADER_LEN - 4 {
            return Ok(false);
        }
        if header[4] != 0 {
            debug!(version = header[4], "ogg: unknown page version, skipping");
            return Ok(true);
        }

        let flags = header[5];
        let serial = u32::from_le_bytes([header[14], header[15], header[16], header[17]]);
        let mut lacing = vec![0u8; header[26] as usize];
        if self.fill(&mut lacing)? < lacing.len() {
            return Ok(false);
        }
        let body_len: usize = lacing.iter().map(|&l| l as usize).sum();
        let mut body = vec![0u8; body_len];
        if self.fill(&mut body)? < body_len {
            return Ok(false);
        }

        let expected = u32::from_le_bytes([header[22], header[23], header[24], header[25]]);
        header[22..26].fill(0);
        let crc = crc32::update(crc32::update(crc32::update(0, &header), &lacing), &body);
        if crc != expected {
            debug!(serial, "ogg: CRC mismatch, page dropped");
            self.partial.clear();
            return Ok(true);
        }

        if flags & FLAG_BOS != 0 {
            if self.serial.is_some() {
                debug!(serial, "ogg: chained logical stream");
            }
            self.serial = Some(serial);
            self.partial.clear();
            self.fresh_stream = true;
        } else if self.serial != Some(serial) {
            if self.serial.is_none() {
                // flux pris en cours de route : pas de BOS, on l'adopte
                self.serial = Some(serial);
                self.fresh_stream = true;
            } else {
                // autre flux multiplexé
                return Ok(true);
            }
        }

        if flags & FLAG_CONTINUED == 0 {
            self.partial.clear();
        }

        let mut offset = 0;
        for &len in &lacing {
            let end = offset + len as usize;
            self.partial.extend_from_slice(&body[offset..end]);
            offset = end;
            if len < 255 {
                let data = std::mem::take(&mut self.partial);
                self.ready.push_back(OggPacket {
                    data,
                    serial,
                    starts_stream: std::mem::take(&mut self.fresh_stream),
                });
            }
        }

        if flags & FLAG_EOS != 0 {
            self.partial.clear();
        }
        Ok(true)
    }
}

/// Ogg CRC-32 (polynomial 0x04c11db7, no reflection, no final xor).
pub(crate) mod crc32 {
    const fn table() -> [u32; 256] {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut r = (i as u32) << 24;
            let mut bit = 0;
            while bit < 8 {
                r = if r & 0x8000_0000 != 0 {
                    (r << 1) ^ 0x04c1_1db7
                } else {
                    r << 1
                };
                bit += 1;
            }
            table[i] = r;
            i += 1;
        }
        table
    }

    static TABLE: [u32; 256] = table();

    pub fn update(crc: u32, data: &[u8]) -> u32 {
        data.iter().fold(crc, |crc, &b| {
            (crc << 8) ^ TABLE[((crc >> 24) ^ b as u32) as usize]
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    /// Builds a single-segment-per-packet page.
    pub(crate) fn page(serial: u32, flags: u8, packets: &[&[u8]]) -> Vec<u8> {
        let mut lacing = Vec::new();
        let mut body = Vec::new();
        for packet in packets {
            let mut left = packet.len();
            while left >= 255 {
                lacing.push(255);
                left -= 255;
            }
            lacing.push(left as u8);
            body.extend_from_slice(packet);
        }
        let mut page = Vec::new();
        page.extend_from_slice(CAPTURE);
        page.push(0);
        page.push(flags);
        page.extend_from_slice(&0u64.to_le_bytes());
        page.extend_from_slice(&serial.to_le_bytes());
        page.extend_from_slice(&0u32.to_le_bytes());
        page.extend_from_slice(&0u32.to_le_bytes());
        page.push(lacing.len() as u8);
        page.extend_from_slice(&lacing);
        page.extend_from_slice(&body);
        let crc = crc32::update(0, &page);
        page[22..26].copy_from_slice(&crc.to_le_bytes());
        page
    }

    #[test]
    fn test_packets_and_chaining() {
        let mut data = b"garbage".to_vec();
        data.extend(page(1, FLAG_BOS, &[b"head".as_slice()]));
        data.extend(page(1, FLAG_EOS, &[b"a".as_slice(), [7u8; 300].as_slice()]));
        data.extend(page(2, FLAG_BOS, &[b"next".as_slice()]));

        let mut reader = OggPacketReader::new(Cursor::new(data));
        let first = reader.next_packet().unwrap().unwrap();
        assert!(first.starts_stream);
        assert_eq!(first.data, b"head");
        let second = reader.next_packet().unwrap().unwrap();
        assert!(!second.starts_stream);
        assert_eq!(second.data, b"a");
        assert_eq!(reader.next_packet().unwrap().unwrap().data.len(), 300);
        let chained = reader.next_packet().unwrap().unwrap();
        assert!(chained.starts_stream);
        assert_eq!(chained.serial, 2);
        assert!(reader.next_packet().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_page_is_dropped() {
        let mut bad = page(1, FLAG_BOS, &[b"one".as_slice()]);
        let last = bad.len() - 1;
        bad[last] ^= 0xff;
        bad.extend(page(1, 0, &[b"two".as_slice()]));
        let mut reader = OggPacketReader::new(Cursor::new(bad));
        let packet = reader.next_packet().unwrap().unwrap();
        assert_eq!(packet.data, b"two");
        assert!(packet.starts_stream);
    }
}
