use bytes::{Buf, BytesMut};
use log::{debug, trace};

use crate::structs::page::{CAPTURE_PATTERN, CHECKSUM_OFFSET, Page, PageHeader, lacing_sum};
use crate::utils::byteorder::WireLen;
use crate::utils::crc::OGG_PAGE_CRC;
use crate::utils::errors::SyncError;

/// Limits applied to a [`SyncState`].
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upper bound on bytes held in the accumulator. Pages are at most
    /// 65 307 bytes, so this only bites when a caller keeps appending without
    /// extracting.
    pub max_buffered: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_buffered: 64 * 1024 * 1024,
        }
    }
}

/// Result of one extraction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOut {
    /// A complete, checksum-verified page.
    Page(Page),
    /// Not enough bytes buffered to decide; append more and retry.
    NeedMore,
    /// Bytes at the cursor did not start a valid page and were discarded.
    /// The next call continues from the following page candidate.
    LostSync { skipped: usize },
}

/// Recovers page boundaries from an arbitrary byte stream.
///
/// Bytes are appended with [`SyncState::write`] in any chunking; each call to
/// [`SyncState::page_out`] either yields the next page, asks for more data, or
/// reports how many bytes were thrown away while hunting for the next capture
/// pattern. Candidates are accepted only when the full page is buffered and
/// its CRC matches, so a stray `OggS` inside garbage is not mistaken for a
/// page. The first valid candidate wins; there is no look-ahead past it.
///
/// Extracted pages are cut out of the internal buffer without copying and
/// remain valid after the accumulator moves on or is dropped.
///
/// A stray capture pattern declaring a long lacing table stalls extraction
/// until the declared page length is buffered (up to 65 307 bytes). At the
/// end of input, drain with [`SyncState::finish`] instead of `page_out`.
///
/// # Example
///
/// ```rust
/// use oggcore::process::stream::StreamState;
/// use oggcore::process::sync::{SyncOut, SyncState};
/// use oggcore::structs::packet::Packet;
///
/// let mut encoder = StreamState::new(7);
/// encoder.packet_in(&Packet::new(&b"hello"[..]).with_eos(true))?;
/// let page = encoder.flush().expect("one page");
///
/// let mut sync = SyncState::default();
/// sync.write(&page.to_buffer())?;
///
/// assert_eq!(sync.page_out(), SyncOut::Page(page));
/// assert_eq!(sync.page_out(), SyncOut::NeedMore);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Default)]
pub struct SyncState {
    buffer: BytesMut,
    config: SyncConfig,
    pages_extracted: usize,
    bytes_skipped: usize,
    lost_sync_events: usize,
}

enum Candidate {
    Page {
        fields: PageHeader,
        header_len: usize,
        body_len: usize,
    },
    Incomplete,
    Invalid,
}

impl SyncState {
    pub fn with_config(config: SyncConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Appends raw stream bytes to the scan window.
    ///
    /// Returns the number of bytes accepted. Fails only when the configured
    /// buffer limit would be exceeded, which leaves the accumulator unchanged.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, SyncError> {
        let buffered = self.buffer.len();
        if buffered.saturating_add(data.len()) > self.config.max_buffered {
            return Err(SyncError::BufferLimit {
                buffered,
                incoming: data.len(),
                limit: self.config.max_buffered,
            });
        }

        self.buffer.extend_from_slice(data);
        trace!("Sync buffer: +{} bytes, {} buffered", data.len(), self.buffer.len());
        Ok(data.len())
    }

    /// Attempts to extract the next page at the cursor.
    pub fn page_out(&mut self) -> SyncOut {
        self.extract(false)
    }

    /// Extraction for the end of input.
    ///
    /// A capture pattern whose declared page runs past the buffered bytes
    /// makes [`page_out`](Self::page_out) wait for more input, which may
    /// hide real pages inside the declared span. With no more input coming,
    /// such a candidate is discarded like any other invalid one and the scan
    /// continues behind it. Returns [`SyncOut::NeedMore`] once the buffer is
    /// empty.
    pub fn finish(&mut self) -> SyncOut {
        self.extract(true)
    }

    fn extract(&mut self, at_end: bool) -> SyncOut {
        let mut skipped = 0;

        loop {
            let candidate = match self.inspect() {
                Candidate::Incomplete if at_end && !self.buffer.is_empty() => Candidate::Invalid,
                candidate => candidate,
            };
            match candidate {
                Candidate::Page { .. } | Candidate::Incomplete if skipped > 0 => {
                    return self.lost_sync(skipped);
                }
                Candidate::Page {
                    fields,
                    header_len,
                    body_len,
                } => {
                    let mut header = self.buffer.split_to(header_len + body_len).freeze();
                    let body = header.split_off(header_len);

                    self.pages_extracted += 1;
                    debug!(
                        "Page out: serial {}, sequence {}, {} + {} bytes",
                        fields.serial, fields.sequence, header_len, body_len
                    );

                    return SyncOut::Page(Page::from_validated(fields, header, body));
                }
                Candidate::Incomplete => return SyncOut::NeedMore,
                Candidate::Invalid => {
                    let skip = self.next_candidate();
                    self.buffer.advance(skip);
                    skipped += skip;
                }
            }
        }
    }

    /// Discards all buffered bytes; the next page is searched from scratch.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Bytes currently held and not yet returned as pages or skipped.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn pages_extracted(&self) -> usize {
        self.pages_extracted
    }

    pub fn bytes_skipped(&self) -> usize {
        self.bytes_skipped
    }

    pub fn lost_sync_events(&self) -> usize {
        self.lost_sync_events
    }

    fn lost_sync(&mut self, skipped: usize) -> SyncOut {
        self.bytes_skipped += skipped;
        self.lost_sync_events += 1;
        debug!("Lost sync: skipped {skipped} bytes");
        SyncOut::LostSync { skipped }
    }

    /// Checks whether the bytes at the cursor form a complete, valid page.
    fn inspect(&self) -> Candidate {
        let buf = &self.buffer[..];

        let prefix = buf.len().min(CAPTURE_PATTERN.len());
        if buf[..prefix] != CAPTURE_PATTERN[..prefix] {
            return Candidate::Invalid;
        }

        if buf.len() < PageHeader::WIRE_LEN {
            return Candidate::Incomplete;
        }

        let header_len = PageHeader::WIRE_LEN + buf[PageHeader::WIRE_LEN - 1] as usize;
        if buf.len() < header_len {
            return Candidate::Incomplete;
        }

        let body_len = lacing_sum(&buf[PageHeader::WIRE_LEN..header_len]);
        if buf.len() < header_len + body_len {
            return Candidate::Incomplete;
        }

        let Ok(fields) = PageHeader::parse(&buf[..header_len]) else {
            return Candidate::Invalid;
        };

        let header = &buf[..header_len];
        let body = &buf[header_len..header_len + body_len];
        let stored = u32::from_le_bytes([
            header[CHECKSUM_OFFSET],
            header[CHECKSUM_OFFSET + 1],
            header[CHECKSUM_OFFSET + 2],
            header[CHECKSUM_OFFSET + 3],
        ]);
        if stored != OGG_PAGE_CRC.page_checksum(header, body) {
            trace!("Page candidate failed CRC check");
            return Candidate::Invalid;
        }

        Candidate::Page {
            fields,
            header_len,
            body_len,
        }
    }

    /// Distance to the next byte that could start a capture pattern.
    fn next_candidate(&self) -> usize {
        self.buffer
            .iter()
            .skip(1)
            .position(|&b| b == CAPTURE_PATTERN[0])
            .map_or(self.buffer.len(), |p| p + 1)
    }
}
