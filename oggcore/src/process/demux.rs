use std::collections::{HashMap, VecDeque};

use log::{Level, debug};

use crate::log_or_err;
use crate::process::stream::{PacketOut, PageIn, StreamConfig, StreamState};
use crate::process::sync::{SyncConfig, SyncOut, SyncState};
use crate::structs::packet::Packet;
use crate::structs::page::Page;
use crate::utils::errors::{DemuxError, StreamError};

/// Something observed while reading a physical stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemuxEvent {
    /// Non-page bytes were discarded.
    LostSync { skipped: usize },
    /// A logical stream started, either on a BOS page or on the first page
    /// seen for an unknown serial.
    NewStream { serial: i32 },
    /// A page was routed to its logical stream.
    Page { serial: i32, page: Page },
    Packet { serial: i32, packet: Packet },
    /// Data was lost in front of the next packet of this stream.
    Gap { serial: i32 },
    /// The last packet of this stream has been emitted.
    EndOfStream { serial: i32 },
}

/// Splits a multiplexed physical stream into per-serial events.
///
/// Feed bytes with [`push_bytes`](Self::push_bytes) and drain events with
/// [`next_event`](Self::next_event) or by iterating; `None` means more input
/// is needed. Events for one page arrive in order: stream start, the page,
/// the packets it completes, end of stream.
///
/// Lost sync and page gaps are logged as warnings and surfaced as events;
/// pages with an unsupported structure version are logged and skipped.
/// With [`set_fail_level`](Self::set_fail_level) at [`Level::Warn`] they are
/// returned as errors instead.
///
/// Once the input is exhausted, call [`end_of_input`](Self::end_of_input) and
/// drain the remaining events so pages behind a truncated candidate are
/// still found.
#[derive(Debug)]
pub struct Demuxer {
    sync: SyncState,
    streams: HashMap<i32, StreamState>,
    pending: VecDeque<DemuxEvent>,
    stream_config: StreamConfig,
    draining: bool,
    pub fail_level: Level,
}

impl Default for Demuxer {
    fn default() -> Self {
        Self::new(SyncConfig::default(), StreamConfig::default())
    }
}

impl Demuxer {
    pub fn new(sync_config: SyncConfig, stream_config: StreamConfig) -> Self {
        Self {
            sync: SyncState::with_config(sync_config),
            streams: HashMap::new(),
            pending: VecDeque::new(),
            stream_config,
            draining: false,
            fail_level: Level::Error,
        }
    }

    pub fn set_fail_level(&mut self, level: Level) {
        self.fail_level = level;
    }

    pub fn push_bytes(&mut self, data: &[u8]) -> Result<(), DemuxError> {
        self.sync.write(data)?;
        self.draining = false;
        Ok(())
    }

    /// Marks the input as complete; see [`SyncState::finish`].
    pub fn end_of_input(&mut self) {
        self.draining = true;
    }

    pub fn next_event(&mut self) -> Result<Option<DemuxEvent>, DemuxError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            let out = if self.draining {
                self.sync.finish()
            } else {
                self.sync.page_out()
            };
            match out {
                SyncOut::NeedMore => return Ok(None),
                SyncOut::LostSync { skipped } => {
                    log_or_err!(self, Level::Warn, DemuxError::LostSync(skipped));
                    return Ok(Some(DemuxEvent::LostSync { skipped }));
                }
                SyncOut::Page(page) => self.route(page)?,
            }
        }
    }

    pub fn stream(&self, serial: i32) -> Option<&StreamState> {
        self.streams.get(&serial)
    }

    pub fn sync(&self) -> &SyncState {
        &self.sync
    }

    fn route(&mut self, page: Page) -> Result<(), DemuxError> {
        let serial = page.serial();

        if page.version() != 0 {
            log_or_err!(
                self,
                Level::Warn,
                DemuxError::Stream(StreamError::UnsupportedVersion(page.version()))
            );
            debug!("Demux: skipped page {} of logical stream {serial}", page.sequence());
            return Ok(());
        }

        let restart = match self.streams.get(&serial) {
            None => true,
            Some(stream) => page.is_bos() && stream.is_eos(),
        };
        if restart {
            debug!("Demux: logical stream {serial} starts");
            self.streams
                .insert(serial, StreamState::with_config(serial, self.stream_config.clone()));
            self.pending.push_back(DemuxEvent::NewStream { serial });
        }

        let Some(stream) = self.streams.get_mut(&serial) else {
            return Ok(());
        };
        let status = stream.page_in(&page)?;
        let page_eos = page.is_eos();
        self.pending.push_back(DemuxEvent::Page { serial, page });

        if let PageIn::Discontinuity { expected, found } = status {
            log_or_err!(
                self,
                Level::Warn,
                DemuxError::PageGap {
                    serial,
                    expected,
                    found
                }
            );
        }

        let ended = self.drain_packets(serial)?;

        // an end-of-stream page may close the stream without completing a packet
        if page_eos && !ended {
            debug!("Demux: logical stream {serial} ends");
            self.pending.push_back(DemuxEvent::EndOfStream { serial });
        }
        Ok(())
    }

    /// Queues every packet the stream can produce. Returns true if one of
    /// them ended the stream.
    fn drain_packets(&mut self, serial: i32) -> Result<bool, DemuxError> {
        let mut ended = false;
        loop {
            let out = match self.streams.get_mut(&serial) {
                Some(stream) => stream.packet_out(),
                None => return Ok(ended),
            };

            match out {
                PacketOut::NeedMore => return Ok(ended),
                PacketOut::Gap => {
                    log_or_err!(self, Level::Debug, DemuxError::PacketGap(serial));
                    self.pending.push_back(DemuxEvent::Gap { serial });
                }
                PacketOut::Packet(packet) => {
                    let eos = packet.end_of_stream;
                    self.pending.push_back(DemuxEvent::Packet { serial, packet });
                    if eos {
                        ended = true;
                        debug!("Demux: logical stream {serial} ends");
                        self.pending.push_back(DemuxEvent::EndOfStream { serial });
                    }
                }
            }
        }
    }
}

impl Iterator for Demuxer {
    type Item = Result<DemuxEvent, DemuxError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}
