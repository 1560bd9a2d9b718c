use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};
use log::{debug, trace};

use crate::structs::packet::{GRANULE_UNDETERMINED, Packet};
use crate::structs::page::{
    CAPTURE_PATTERN, CHECKSUM_OFFSET, HEADER_TYPE_BOS, HEADER_TYPE_CONTINUED, HEADER_TYPE_EOS,
    MAX_SEGMENTS, Page, PageHeader, lacing_sum,
};
use crate::utils::crc::OGG_PAGE_CRC;
use crate::utils::errors::StreamError;
use crate::utils::serial::next_serial;

/// Tuning for a [`StreamState`].
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Body size after which [`StreamState::page_out`] emits a page.
    pub page_fill: usize,
    /// Upper bound on buffered payload bytes per direction.
    pub max_buffered: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            page_fill: 4096,
            max_buffered: 64 * 1024 * 1024,
        }
    }
}

/// Outcome of submitting a page to the decode side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageIn {
    Accepted,
    /// The page was accepted, but one or more pages before it are missing.
    /// A lost-data marker is queued in front of the page's packets.
    Discontinuity { expected: u32, found: u32 },
}

/// Outcome of one packet extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketOut {
    Packet(Packet),
    /// No complete packet is buffered.
    NeedMore,
    /// Data was lost at this position; extraction continues with the next
    /// packet on the following call.
    Gap,
}

const SEG_BEGIN: u8 = 0x01;
const SEG_EOS: u8 = 0x02;
const SEG_GAP: u8 = 0x04;

#[derive(Debug, Clone, Copy)]
struct Segment {
    len: u8,
    flags: u8,
    granule: i64,
}

impl Segment {
    const GAP: Self = Self {
        len: 0,
        flags: SEG_GAP,
        granule: GRANULE_UNDETERMINED,
    };

    fn is_gap(&self) -> bool {
        self.flags & SEG_GAP != 0
    }
}

enum Assembly {
    NeedMore,
    Gap,
    Packet {
        last: usize,
        bytes: usize,
        bos: bool,
        eos: bool,
    },
}

/// Page → packet direction.
#[derive(Debug, Default)]
struct Inbound {
    body: BytesMut,
    segments: Vec<Segment>,
    /// Segments already handed out as packets.
    returned: usize,
    /// One past the last segment that closes a packet.
    packet_end: usize,
    expected_page: Option<u32>,
    packetno: i64,
    eos: bool,
}

impl Inbound {
    fn compact(&mut self) {
        if self.returned > 0 {
            self.segments.drain(..self.returned);
            self.packet_end -= self.returned;
            self.returned = 0;
        }
    }

    /// Drops segments of a packet that has not been completed yet.
    fn drop_partial(&mut self) {
        let partial = lacing_total(&self.segments[self.packet_end..]);
        let keep = self.body.len().saturating_sub(partial);
        self.body.truncate(keep);
        self.segments.truncate(self.packet_end);
    }

    fn assemble(&self) -> Assembly {
        let start = self.returned;
        if self.packet_end <= start {
            return Assembly::NeedMore;
        }

        let first = self.segments[start];
        if first.is_gap() {
            return Assembly::Gap;
        }

        let mut last = start;
        let mut bytes = first.len as usize;
        let mut eos = first.flags & SEG_EOS != 0;
        while self.segments[last].len == 255 {
            last += 1;
            let seg = self.segments[last];
            bytes += seg.len as usize;
            eos |= seg.flags & SEG_EOS != 0;
        }

        Assembly::Packet {
            last,
            bytes,
            bos: first.flags & SEG_BEGIN != 0,
            eos,
        }
    }
}

/// Packet → page direction.
#[derive(Debug, Default)]
struct Outbound {
    body: BytesMut,
    segments: VecDeque<Segment>,
    pageno: u32,
    packetno: i64,
    granule: i64,
    bos_written: bool,
    eos_queued: bool,
}

fn lacing_total<'a>(segments: impl IntoIterator<Item = &'a Segment>) -> usize {
    segments.into_iter().map(|s| s.len as usize).sum()
}

/// Per-logical-stream codec state.
///
/// A stream is identified by its serial number and works in both directions:
/// pages submitted with [`page_in`](Self::page_in) are reassembled into
/// packets drawn with [`packet_out`](Self::packet_out), and packets submitted
/// with [`packet_in`](Self::packet_in) are laid out into pages drawn with
/// [`page_out`](Self::page_out) or [`flush`](Self::flush). The two directions
/// keep separate buffers and do not interact.
///
/// Packets returned from the decode side own their payload; it is cut out of
/// the stream's buffer without copying and stays valid after further calls.
#[derive(Debug)]
pub struct StreamState {
    serial: i32,
    config: StreamConfig,
    inbound: Inbound,
    outbound: Outbound,
}

impl Default for StreamState {
    fn default() -> Self {
        Self::with_next_serial(StreamConfig::default())
    }
}

impl StreamState {
    pub fn new(serial: i32) -> Self {
        Self::with_config(serial, StreamConfig::default())
    }

    pub fn with_config(serial: i32, config: StreamConfig) -> Self {
        Self {
            serial,
            config,
            inbound: Inbound::default(),
            outbound: Outbound::default(),
        }
    }

    /// Creates a stream numbered from the process-wide serial counter.
    pub fn with_next_serial(config: StreamConfig) -> Self {
        Self::with_config(next_serial(), config)
    }

    pub fn serial(&self) -> i32 {
        self.serial
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// True once an end-of-stream page has been accepted or an end-of-stream
    /// packet has been submitted.
    pub fn is_eos(&self) -> bool {
        self.inbound.eos || self.outbound.eos_queued
    }

    /// Clears both directions, keeping the serial number.
    pub fn reset(&mut self) {
        self.inbound = Inbound::default();
        self.outbound = Outbound::default();
    }

    pub fn reset_serial(&mut self, serial: i32) {
        self.reset();
        self.serial = serial;
    }

    /// Submits a page to the decode side.
    ///
    /// A page whose sequence number does not follow the previous one is
    /// still accepted; the incomplete packet carried over from earlier pages
    /// is discarded, a gap marker is queued, and a leading continuation
    /// fragment on the new page is dropped as well. The first page seen by a
    /// fresh stream sets the expected sequence without reporting a gap.
    pub fn page_in(&mut self, page: &Page) -> Result<PageIn, StreamError> {
        if page.serial() != self.serial {
            return Err(StreamError::SerialMismatch {
                expected: self.serial,
                found: page.serial(),
            });
        }
        if page.version() != 0 {
            return Err(StreamError::UnsupportedVersion(page.version()));
        }

        let inbound = &mut self.inbound;
        inbound.compact();

        let buffered = inbound.body.len();
        if buffered.saturating_add(page.body().len()) > self.config.max_buffered {
            return Err(StreamError::BufferLimit {
                serial: self.serial,
                buffered,
                incoming: page.body().len(),
                limit: self.config.max_buffered,
            });
        }

        let sequence = page.sequence();
        let mut status = PageIn::Accepted;
        if let Some(expected) = inbound.expected_page {
            if expected != sequence {
                debug!(
                    "Stream {}: page gap, expected sequence {expected}, found {sequence}",
                    self.serial
                );
                inbound.drop_partial();
                inbound.segments.push(Segment::GAP);
                inbound.packet_end = inbound.segments.len();
                status = PageIn::Discontinuity {
                    expected,
                    found: sequence,
                };
            }
        }

        let lacing = page.segment_table();
        let mut body = page.body().clone();
        let mut first = 0;
        let mut bos = page.is_bos();

        if page.is_continued() {
            let continues = inbound
                .segments
                .last()
                .is_some_and(|s| s.len == 255 && !s.is_gap());
            if !continues {
                bos = false;
                let mut skip = 0;
                while first < lacing.len() {
                    let len = lacing[first];
                    skip += len as usize;
                    first += 1;
                    if len < 255 {
                        break;
                    }
                }
                trace!("Stream {}: dropping {skip} byte continuation fragment", self.serial);
                body.advance(skip);
            }
        }

        inbound.body.extend_from_slice(&body);

        let mut closing = None;
        for &len in &lacing[first..] {
            let mut flags = 0;
            if bos {
                flags |= SEG_BEGIN;
                bos = false;
            }
            inbound.segments.push(Segment {
                len,
                flags,
                granule: GRANULE_UNDETERMINED,
            });
            if len < 255 {
                closing = Some(inbound.segments.len() - 1);
                inbound.packet_end = inbound.segments.len();
            }
        }

        if let Some(index) = closing {
            inbound.segments[index].granule = page.granule_position();
        }

        if page.is_eos() {
            inbound.eos = true;
            if let Some(last) = inbound.segments.last_mut() {
                last.flags |= SEG_EOS;
            }
        }

        inbound.expected_page = Some(sequence.wrapping_add(1));
        Ok(status)
    }

    /// Draws the next complete packet from the decode side.
    pub fn packet_out(&mut self) -> PacketOut {
        let inbound = &mut self.inbound;
        match inbound.assemble() {
            Assembly::NeedMore => PacketOut::NeedMore,
            Assembly::Gap => {
                inbound.returned += 1;
                inbound.packetno += 1;
                PacketOut::Gap
            }
            Assembly::Packet {
                last,
                bytes,
                bos,
                eos,
            } => {
                let packet = Packet::new(inbound.body.split_to(bytes).freeze())
                    .with_bos(bos)
                    .with_eos(eos)
                    .with_granule_position(inbound.segments[last].granule)
                    .with_sequence_number(inbound.packetno);
                inbound.returned = last + 1;
                inbound.packetno += 1;
                PacketOut::Packet(packet)
            }
        }
    }

    /// Like [`packet_out`](Self::packet_out) but leaves the packet queued.
    /// The returned payload is a copy.
    pub fn packet_peek(&self) -> PacketOut {
        let inbound = &self.inbound;
        match inbound.assemble() {
            Assembly::NeedMore => PacketOut::NeedMore,
            Assembly::Gap => PacketOut::Gap,
            Assembly::Packet {
                last,
                bytes,
                bos,
                eos,
            } => PacketOut::Packet(
                Packet::new(Bytes::copy_from_slice(&inbound.body[..bytes]))
                    .with_bos(bos)
                    .with_eos(eos)
                    .with_granule_position(inbound.segments[last].granule)
                    .with_sequence_number(inbound.packetno),
            ),
        }
    }

    /// Queues a packet on the encode side.
    ///
    /// The payload is copied into the stream's buffer; the caller may reuse
    /// its memory as soon as this returns. Only `granule_position` and
    /// `end_of_stream` are taken from the packet; beginning-of-stream and
    /// sequence numbering are the stream's own.
    pub fn packet_in(&mut self, packet: &Packet) -> Result<(), StreamError> {
        let out = &mut self.outbound;
        if out.eos_queued {
            return Err(StreamError::AfterEndOfStream(self.serial));
        }

        let payload = packet.payload();
        let buffered = out.body.len();
        if buffered.saturating_add(payload.len()) > self.config.max_buffered {
            return Err(StreamError::BufferLimit {
                serial: self.serial,
                buffered,
                incoming: payload.len(),
                limit: self.config.max_buffered,
            });
        }

        out.body.extend_from_slice(payload);

        let full = payload.len() / 255;
        for i in 0..full {
            out.segments.push_back(Segment {
                len: 255,
                flags: if i == 0 { SEG_BEGIN } else { 0 },
                granule: out.granule,
            });
        }
        out.segments.push_back(Segment {
            len: (payload.len() % 255) as u8,
            flags: if full == 0 { SEG_BEGIN } else { 0 },
            granule: packet.granule_position,
        });

        out.granule = packet.granule_position;
        out.packetno += 1;
        if packet.end_of_stream {
            out.eos_queued = true;
        }

        trace!(
            "Stream {}: packet {} in, {} bytes, {} segments pending",
            self.serial,
            out.packetno - 1,
            payload.len(),
            out.segments.len()
        );
        Ok(())
    }

    /// Emits a page once enough data is queued.
    ///
    /// The first packet always gets a page of its own. After that a page is
    /// cut when its body passes the fill threshold, when the lacing table is
    /// full, or when end-of-stream is queued. Returns `None` otherwise.
    pub fn page_out(&mut self) -> Option<Page> {
        self.page_out_fill(self.config.page_fill)
    }

    /// [`page_out`](Self::page_out) with an explicit fill threshold.
    pub fn page_out_fill(&mut self, fill: usize) -> Option<Page> {
        let out = &self.outbound;
        let pending = !out.segments.is_empty();
        let force = pending && (out.eos_queued || !out.bos_written);
        self.emit(force, fill)
    }

    /// Emits whatever is queued as a page, regardless of size.
    /// Returns `None` only when nothing is queued.
    pub fn flush(&mut self) -> Option<Page> {
        self.flush_fill(self.config.page_fill)
    }

    /// [`flush`](Self::flush) with an explicit fill threshold, so one call
    /// may still leave data queued when more than `fill` bytes are pending.
    pub fn flush_fill(&mut self, fill: usize) -> Option<Page> {
        self.emit(true, fill)
    }

    fn emit(&mut self, mut force: bool, fill: usize) -> Option<Page> {
        let out = &mut self.outbound;
        let limit = out.segments.len().min(MAX_SEGMENTS);
        if limit == 0 {
            return None;
        }

        let mut vals = 0;
        let mut granule = GRANULE_UNDETERMINED;

        if !out.bos_written {
            granule = 0;
            while vals < limit {
                let len = out.segments[vals].len;
                vals += 1;
                if len < 255 {
                    break;
                }
            }
        } else {
            let mut acc = 0;
            let mut packets_done = 0;
            let mut packet_just_done = 0;
            while vals < limit {
                if acc > fill && packet_just_done >= 4 {
                    force = true;
                    break;
                }
                let seg = out.segments[vals];
                acc += seg.len as usize;
                if seg.len < 255 {
                    granule = seg.granule;
                    packets_done += 1;
                    packet_just_done = packets_done;
                } else {
                    packet_just_done = 0;
                }
                vals += 1;
            }
            if vals == MAX_SEGMENTS {
                force = true;
            }
        }

        if !force {
            return None;
        }

        let mut header_type = 0;
        if out.segments[0].flags & SEG_BEGIN == 0 {
            header_type |= HEADER_TYPE_CONTINUED;
        }
        if !out.bos_written {
            header_type |= HEADER_TYPE_BOS;
        }
        if out.eos_queued && out.segments.len() == vals {
            header_type |= HEADER_TYPE_EOS;
        }
        out.bos_written = true;

        let lacing: Vec<u8> = out.segments.drain(..vals).map(|s| s.len).collect();
        let body = out.body.split_to(lacing_sum(&lacing)).freeze();

        let mut fields = PageHeader {
            capture: CAPTURE_PATTERN,
            version: 0,
            header_type,
            granule_position: granule,
            serial: self.serial,
            sequence: out.pageno,
            checksum: 0,
            segment_count: vals as u8,
        };
        out.pageno = out.pageno.wrapping_add(1);

        let mut header = fields.to_bytes(&lacing);
        fields.checksum = OGG_PAGE_CRC.page_checksum(&header, &body);
        header[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&fields.checksum.to_le_bytes());

        debug!(
            "Stream {}: page {} out, {} segments, {} bytes, granule {granule}",
            self.serial,
            fields.sequence,
            vals,
            body.len()
        );

        Some(Page::from_validated(fields, Bytes::from(header), body))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::process::testing::build_page;

    fn payload(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    fn drain_pages(stream: &mut StreamState) -> Vec<Page> {
        let mut pages = Vec::new();
        while let Some(page) = stream.page_out() {
            pages.push(page);
        }
        while let Some(page) = stream.flush() {
            pages.push(page);
        }
        pages
    }

    fn drain_packets(stream: &mut StreamState) -> Vec<PacketOut> {
        let mut out = Vec::new();
        loop {
            match stream.packet_out() {
                PacketOut::NeedMore => break,
                other => out.push(other),
            }
        }
        out
    }

    fn unwrap_packets(out: Vec<PacketOut>) -> Vec<Packet> {
        out.into_iter()
            .map(|p| match p {
                PacketOut::Packet(packet) => packet,
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[test]
    fn first_packet_gets_its_own_page() -> anyhow::Result<()> {
        let mut enc = StreamState::new(42);
        enc.packet_in(&Packet::new(payload(19, 1)).with_granule_position(0))?;
        enc.packet_in(&Packet::new(payload(30, 2)).with_granule_position(0))?;
        enc.packet_in(&Packet::new(payload(40, 3)).with_granule_position(960))?;

        let header = enc.page_out().expect("header page");
        assert!(header.is_bos());
        assert!(!header.is_continued());
        assert_eq!(header.sequence(), 0);
        assert_eq!(header.granule_position(), 0);
        assert_eq!(header.packets(), 1);
        assert!(header.verify_checksum());

        assert!(enc.page_out().is_none());

        let rest = enc.flush().expect("flushed page");
        assert!(!rest.is_bos());
        assert_eq!(rest.sequence(), 1);
        assert_eq!(rest.packets(), 2);
        assert_eq!(rest.granule_position(), 960);
        assert!(rest.verify_checksum());

        assert!(enc.flush().is_none());
        assert!(enc.page_out().is_none());
        Ok(())
    }

    #[test]
    fn single_packet_round_trip() -> anyhow::Result<()> {
        let mut enc = StreamState::new(7);
        let original = Packet::new(&b"OpusHead"[..])
            .with_bos(true)
            .with_granule_position(0);
        enc.packet_in(&original)?;
        let page = enc.page_out().expect("page");

        let mut dec = StreamState::new(7);
        assert_eq!(dec.page_in(&page)?, PageIn::Accepted);

        let PacketOut::Packet(packet) = dec.packet_out() else {
            panic!("expected packet");
        };
        assert_eq!(packet.payload(), original.payload());
        assert!(packet.begin_of_stream);
        assert!(!packet.end_of_stream);
        assert_eq!(packet.granule_position, 0);
        assert_eq!(packet.sequence_number, 0);
        assert_eq!(dec.packet_out(), PacketOut::NeedMore);
        Ok(())
    }

    #[test]
    fn large_packet_spans_pages() -> anyhow::Result<()> {
        let data = payload(70_000, 9);
        let mut enc = StreamState::new(1);
        enc.packet_in(&Packet::new(data.clone()).with_granule_position(1234))?;

        let first = enc.page_out().expect("first page");
        assert_eq!(first.segment_table().len(), MAX_SEGMENTS);
        assert_eq!(first.packets(), 0);
        assert!(first.is_bos());

        let second = enc.flush().expect("second page");
        assert!(second.is_continued());
        assert_eq!(second.granule_position(), 1234);

        let mut dec = StreamState::new(1);
        dec.page_in(&first)?;
        assert_eq!(dec.packet_out(), PacketOut::NeedMore);
        dec.page_in(&second)?;

        let packets = unwrap_packets(drain_packets(&mut dec));
        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0].payload()[..], &data[..]);
        assert_eq!(packets[0].granule_position, 1234);
        assert!(packets[0].begin_of_stream);
        Ok(())
    }

    #[test]
    fn end_of_stream_only_on_final_page() -> anyhow::Result<()> {
        let mut enc = StreamState::new(5);
        for i in 0..10 {
            enc.packet_in(
                &Packet::new(payload(100, i as u8))
                    .with_granule_position(i * 960)
                    .with_eos(i == 9),
            )?;
        }
        assert!(enc.is_eos());

        let pages = drain_pages(&mut enc);
        assert!(pages.len() >= 2);

        let (last, rest) = pages.split_last().expect("pages");
        assert!(last.is_eos());
        assert!(rest.iter().all(|p| !p.is_eos()));
        assert_eq!(last.granule_position(), 9 * 960);

        let mut dec = StreamState::new(5);
        for page in &pages {
            dec.page_in(page)?;
        }
        let packets = unwrap_packets(drain_packets(&mut dec));
        assert_eq!(packets.len(), 10);
        assert!(packets[9].end_of_stream);
        assert!(packets[..9].iter().all(|p| !p.end_of_stream));
        assert!(dec.is_eos());
        Ok(())
    }

    #[test]
    fn page_sequence_strictly_increases() -> anyhow::Result<()> {
        let mut enc = StreamState::with_config(
            3,
            StreamConfig {
                page_fill: 256,
                ..StreamConfig::default()
            },
        );
        for i in 0..50 {
            enc.packet_in(&Packet::new(payload(90, i)).with_granule_position(i as i64))?;
        }
        let pages = drain_pages(&mut enc);

        assert!(pages.len() > 3);
        for (expected, page) in pages.iter().enumerate() {
            assert_eq!(page.sequence(), expected as u32);
            assert_eq!(page.serial(), 3);
        }
        Ok(())
    }

    #[test]
    fn missing_page_yields_gap() -> anyhow::Result<()> {
        let mut enc = StreamState::new(77);
        let mut pages = Vec::new();
        for i in 0..5u8 {
            enc.packet_in(&Packet::new(payload(20, i)).with_granule_position(i as i64))?;
            pages.push(enc.flush().expect("page"));
        }

        let mut dec = StreamState::new(77);
        let mut status = Vec::new();
        for (i, page) in pages.iter().enumerate() {
            if i != 2 {
                status.push(dec.page_in(page)?);
            }
        }
        assert_eq!(
            status,
            vec![
                PageIn::Accepted,
                PageIn::Accepted,
                PageIn::Discontinuity {
                    expected: 2,
                    found: 3
                },
                PageIn::Accepted,
            ]
        );

        let out = drain_packets(&mut dec);
        assert_eq!(out.len(), 5);
        assert_eq!(out[2], PacketOut::Gap);

        let numbers: Vec<i64> = out
            .iter()
            .filter_map(|p| match p {
                PacketOut::Packet(packet) => Some(packet.sequence_number),
                _ => None,
            })
            .collect();
        assert_eq!(numbers, vec![0, 1, 3, 4]);
        Ok(())
    }

    #[test]
    fn continuation_after_gap_is_dropped() -> anyhow::Result<()> {
        let mut enc = StreamState::new(8);
        enc.packet_in(&Packet::new(payload(10, 0)).with_granule_position(0))?;
        let page0 = enc.page_out().expect("header page");

        enc.packet_in(&Packet::new(payload(70_000, 1)).with_granule_position(100))?;
        enc.packet_in(&Packet::new(payload(12, 2)).with_granule_position(200))?;
        let _page1 = enc.flush().expect("page 1");
        let page2 = enc.flush().expect("page 2");
        assert!(page2.is_continued());

        let mut dec = StreamState::new(8);
        dec.page_in(&page0)?;
        assert_eq!(
            dec.page_in(&page2)?,
            PageIn::Discontinuity {
                expected: 1,
                found: 2
            }
        );

        let out = drain_packets(&mut dec);
        assert_eq!(out.len(), 3);
        assert_eq!(out[1], PacketOut::Gap);
        let PacketOut::Packet(last) = &out[2] else {
            panic!("expected packet");
        };
        assert_eq!(&last.payload()[..], &payload(12, 2)[..]);
        assert_eq!(last.sequence_number, 2);
        assert_eq!(last.granule_position, 200);
        Ok(())
    }

    #[test]
    fn joining_mid_stream_reports_no_gap() -> anyhow::Result<()> {
        let page = build_page(4, 17, 0, 99, &[3], b"mid");

        let mut dec = StreamState::new(4);
        assert_eq!(dec.page_in(&page)?, PageIn::Accepted);

        let PacketOut::Packet(packet) = dec.packet_out() else {
            panic!("expected packet");
        };
        assert_eq!(&packet.payload()[..], b"mid");
        assert!(!packet.begin_of_stream);
        assert_eq!(packet.granule_position, 99);
        Ok(())
    }

    #[test]
    fn peek_leaves_packet_queued() -> anyhow::Result<()> {
        let page = build_page(6, 0, HEADER_TYPE_BOS, 0, &[4], b"peek");
        let mut dec = StreamState::new(6);
        dec.page_in(&page)?;

        let peeked = dec.packet_peek();
        assert_eq!(peeked, dec.packet_out());
        assert_eq!(dec.packet_peek(), PacketOut::NeedMore);
        Ok(())
    }

    #[test]
    fn packets_outlive_later_input() -> anyhow::Result<()> {
        let mut dec = StreamState::new(2);
        dec.page_in(&build_page(2, 0, HEADER_TYPE_BOS, 0, &[5], b"first"))?;
        let PacketOut::Packet(first) = dec.packet_out() else {
            panic!("expected packet");
        };

        dec.page_in(&build_page(2, 1, 0, 1, &[6], b"second"))?;
        let PacketOut::Packet(second) = dec.packet_out() else {
            panic!("expected packet");
        };

        assert_eq!(&first.payload()[..], b"first");
        assert_eq!(&second.payload()[..], b"second");
        Ok(())
    }

    #[test]
    fn rejects_foreign_and_unsupported_pages() -> anyhow::Result<()> {
        let mut dec = StreamState::new(1);
        assert_eq!(
            dec.page_in(&build_page(2, 0, 0, 0, &[1], b"x")),
            Err(StreamError::SerialMismatch {
                expected: 1,
                found: 2
            })
        );

        let mut header = build_page(1, 0, 0, 0, &[1], b"x").header().to_vec();
        header[4] = 1;
        let page = Page::from_parts(header, &b"x"[..])?;
        assert_eq!(dec.page_in(&page), Err(StreamError::UnsupportedVersion(1)));
        Ok(())
    }

    #[test]
    fn packet_after_end_of_stream_is_rejected() -> anyhow::Result<()> {
        let mut enc = StreamState::new(10);
        enc.packet_in(&Packet::new(&b"last"[..]).with_eos(true))?;
        assert_eq!(
            enc.packet_in(&Packet::new(&b"late"[..])),
            Err(StreamError::AfterEndOfStream(10))
        );

        enc.reset();
        assert!(!enc.is_eos());
        enc.packet_in(&Packet::new(&b"again"[..]))?;
        let page = enc.flush().expect("page");
        assert!(page.is_bos());
        assert_eq!(page.sequence(), 0);
        Ok(())
    }

    #[test]
    fn empty_stream_emits_nothing() {
        let mut enc = StreamState::new(1);
        assert!(enc.page_out().is_none());
        assert!(enc.flush().is_none());
    }

    #[test]
    fn implicit_serials_differ() {
        let a = StreamState::default();
        let b = StreamState::default();
        assert_ne!(a.serial(), b.serial());
    }

    proptest! {
        #[test]
        fn packets_survive_encode_decode(
            sizes in prop::collection::vec(0usize..2000, 1..40),
            fill in 64usize..8192,
        ) {
            let packets: Vec<Packet> = sizes
                .iter()
                .enumerate()
                .map(|(i, &len)| {
                    Packet::new(payload(len, i as u8))
                        .with_bos(i == 0)
                        .with_eos(i == sizes.len() - 1)
                        .with_granule_position(i as i64 * 10)
                        .with_sequence_number(i as i64)
                })
                .collect();

            let mut enc = StreamState::with_config(
                99,
                StreamConfig { page_fill: fill, ..StreamConfig::default() },
            );
            let mut pages = Vec::new();
            for packet in &packets {
                enc.packet_in(packet).unwrap();
                while let Some(page) = enc.page_out() {
                    pages.push(page);
                }
            }
            while let Some(page) = enc.flush() {
                pages.push(page);
            }

            let mut dec = StreamState::new(99);
            for page in &pages {
                prop_assert_eq!(dec.page_in(page).unwrap(), PageIn::Accepted);
            }
            let decoded = unwrap_packets(drain_packets(&mut dec));

            prop_assert_eq!(decoded.len(), packets.len());
            for (got, want) in decoded.iter().zip(&packets) {
                prop_assert_eq!(got.payload(), want.payload());
                prop_assert_eq!(got.begin_of_stream, want.begin_of_stream);
                prop_assert_eq!(got.end_of_stream, want.end_of_stream);
                prop_assert_eq!(got.sequence_number, want.sequence_number);
                prop_assert!(
                    got.granule_position == GRANULE_UNDETERMINED
                        || got.granule_position == want.granule_position
                );
            }
            prop_assert_eq!(
                decoded.last().map(|p| p.granule_position),
                packets.last().map(|p| p.granule_position)
            );
        }
    }
}
