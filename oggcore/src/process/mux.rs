use std::collections::HashMap;
use std::io::Write;

use bytes::Bytes;
use log::debug;

use crate::process::stream::{StreamConfig, StreamState};
use crate::structs::packet::Packet;
use crate::structs::page::Page;
use crate::utils::errors::MuxError;
use crate::utils::serial::next_serial;

/// Interleaves logical streams into one physical stream.
///
/// Pages are collected in the order they are cut, across all streams, and
/// handed out with [`take_pages`](Self::take_pages),
/// [`take_output`](Self::take_output) or [`write_to`](Self::write_to).
#[derive(Debug, Default)]
pub struct Muxer {
    streams: Vec<StreamState>,
    index: HashMap<i32, usize>,
    pending: Vec<Page>,
    config: StreamConfig,
}

impl Muxer {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Registers a logical stream. Without an explicit serial one is drawn
    /// from the process-wide counter.
    pub fn add_stream(&mut self, serial: Option<i32>) -> Result<i32, MuxError> {
        let serial = serial.unwrap_or_else(next_serial);
        if self.index.contains_key(&serial) {
            return Err(MuxError::DuplicateStream(serial));
        }

        self.index.insert(serial, self.streams.len());
        self.streams
            .push(StreamState::with_config(serial, self.config.clone()));
        debug!("Mux: added logical stream {serial}");
        Ok(serial)
    }

    pub fn serials(&self) -> impl Iterator<Item = i32> + '_ {
        self.streams.iter().map(StreamState::serial)
    }

    pub fn packet_in(&mut self, serial: i32, packet: &Packet) -> Result<(), MuxError> {
        self.stream_mut(serial)?.packet_in(packet)?;
        Ok(())
    }

    /// Moves every page the stream is ready to emit to the output queue.
    /// Returns the number of pages moved.
    pub fn page_out(&mut self, serial: i32) -> Result<usize, MuxError> {
        let idx = self.position(serial)?;
        let stream = &mut self.streams[idx];

        let before = self.pending.len();
        while let Some(page) = stream.page_out() {
            self.pending.push(page);
        }
        Ok(self.pending.len() - before)
    }

    /// Moves everything queued on the stream to the output queue.
    pub fn flush(&mut self, serial: i32) -> Result<usize, MuxError> {
        let idx = self.position(serial)?;
        let stream = &mut self.streams[idx];

        let before = self.pending.len();
        while let Some(page) = stream.flush() {
            self.pending.push(page);
        }
        Ok(self.pending.len() - before)
    }

    /// Queues a packet and emits pages. With `flush` set, everything
    /// buffered on the stream goes out immediately.
    pub fn write_packet(
        &mut self,
        serial: i32,
        packet: &Packet,
        flush: bool,
    ) -> Result<usize, MuxError> {
        self.packet_in(serial, packet)?;
        if flush {
            self.flush(serial)
        } else {
            self.page_out(serial)
        }
    }

    /// Flushes every stream in registration order.
    pub fn finish(&mut self) -> Result<usize, MuxError> {
        let serials: Vec<i32> = self.serials().collect();
        let mut total = 0;
        for serial in serials {
            total += self.flush(serial)?;
        }
        Ok(total)
    }

    pub fn take_pages(&mut self) -> Vec<Page> {
        std::mem::take(&mut self.pending)
    }

    /// Serialized pages in emission order.
    pub fn take_output(&mut self) -> Vec<Bytes> {
        self.take_pages().iter().map(Page::to_buffer).collect()
    }

    /// Writes pending pages to `writer` and returns the number of bytes written.
    pub fn write_to<W: Write>(&mut self, writer: &mut W) -> Result<usize, MuxError> {
        let mut written = 0;
        for page in self.take_pages() {
            writer.write_all(page.header())?;
            writer.write_all(page.body())?;
            written += page.len();
        }
        Ok(written)
    }

    fn position(&self, serial: i32) -> Result<usize, MuxError> {
        self.index
            .get(&serial)
            .copied()
            .ok_or(MuxError::UnknownStream(serial))
    }

    fn stream_mut(&mut self, serial: i32) -> Result<&mut StreamState, MuxError> {
        let idx = self.position(serial)?;
        Ok(&mut self.streams[idx])
    }
}
