use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use indicatif::MultiProgress;

use super::command::{Cli, RemuxArgs};
use super::progress::spinner_for;
use crate::input::{CHUNK_SIZE, InputReader};
use oggcore::process::stream::{PacketOut, PageIn, StreamConfig, StreamState};
use oggcore::process::sync::{SyncOut, SyncState};
use oggcore::structs::page::Page;
use oggcore::task::handles::{StreamHandle, SyncHandle};
use oggcore::task::pool::Executor;
use oggcore::task::completion::Completion;
use oggcore::task::{BusyPolicy, ExecutorConfig};

pub fn cmd_remux(args: &RemuxArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!(
        "Remuxing {} into {}",
        args.input.display(),
        args.output.display()
    );

    let mut config = ExecutorConfig {
        busy_policy: BusyPolicy::Queue,
        thread_name: "oggd-remux".to_string(),
        ..ExecutorConfig::default()
    };
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    let executor = Executor::new(config)?;

    let output = File::create(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;

    let mut ctx = RemuxContext::new(&executor, BufWriter::new(output), args.page_fill, cli.strict);
    let mut input_reader = InputReader::new(&args.input)?;
    let pb = spinner_for(multi, "Remuxing pages...")?;

    input_reader.process_chunks(CHUNK_SIZE, |chunk| {
        if let Some(pb) = &pb {
            pb.inc(chunk.len() as u64);
        }
        ctx.push_chunk(Bytes::copy_from_slice(chunk))?;
        Ok(true)
    })?;

    let stats = ctx.finish()?;
    executor.shutdown();

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    log::info!(
        "Remux complete: {} streams, {} pages in, {} pages out, {} packets",
        stats.streams,
        stats.pages_in,
        stats.pages_out,
        stats.packets
    );
    if stats.skipped_bytes > 0 {
        log::warn!("{} bytes of non-page data were dropped", stats.skipped_bytes);
    }

    Ok(())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RemuxStats {
    pub streams: usize,
    pub pages_in: usize,
    pub pages_out: usize,
    pub packets: usize,
    pub gaps: usize,
    pub skipped_bytes: usize,
}

/// Decoder and encoder for one logical stream.
struct Lane {
    decoder: StreamHandle,
    encoder: StreamHandle,
}

/// Drives the remux pipeline through the task layer.
///
/// Every page is decoded by its stream's decoder handle; the packets are fed
/// to an encoder handle with the same serial and flushed once the page's
/// packets are in, so output pages follow the input page grouping.
pub struct RemuxContext<'a, W: Write> {
    executor: &'a Executor,
    sync: SyncHandle,
    lanes: HashMap<i32, Lane>,
    writer: W,
    page_fill: usize,
    strict: bool,
    stats: RemuxStats,
}

impl<'a, W: Write> RemuxContext<'a, W> {
    pub fn new(executor: &'a Executor, writer: W, page_fill: usize, strict: bool) -> Self {
        Self {
            executor,
            sync: SyncHandle::new(executor, SyncState::default()),
            lanes: HashMap::new(),
            writer,
            page_fill,
            strict,
            stats: RemuxStats::default(),
        }
    }

    pub fn push_chunk(&mut self, chunk: Bytes) -> Result<()> {
        // queue the extraction right behind the append
        let appended = self.sync.write(chunk)?;
        let next = self.sync.page_out()?;
        appended.wait()??;
        self.extract(next, false)
    }

    /// Routes pages until the accumulator needs more data. At end of input
    /// extraction switches to [`SyncHandle::finish`].
    fn extract(&mut self, mut next: Completion<SyncOut>, at_end: bool) -> Result<()> {
        let request = |sync: &SyncHandle| if at_end { sync.finish() } else { sync.page_out() };
        loop {
            match next.wait()? {
                SyncOut::NeedMore => return Ok(()),
                SyncOut::LostSync { skipped } => {
                    self.stats.skipped_bytes += skipped;
                    if self.strict {
                        bail!("Lost sync: skipped {skipped} bytes of non-page data");
                    }
                    log::warn!("Lost sync: skipped {skipped} bytes of non-page data");
                    next = request(&self.sync)?;
                }
                SyncOut::Page(page) => {
                    next = request(&self.sync)?;
                    self.route(page)?;
                }
            }
        }
    }

    /// Drains the accumulator, flushes every stream, closes all handles and
    /// returns the totals.
    pub fn finish(mut self) -> Result<RemuxStats> {
        let next = self.sync.finish()?;
        self.extract(next, true)?;

        let serials: Vec<i32> = self.lanes.keys().copied().collect();
        for serial in serials {
            if let Some(lane) = self.lanes.remove(&serial) {
                self.retire(lane)?;
            }
        }
        self.sync.close()?.wait()?;
        self.writer.flush()?;
        Ok(self.stats)
    }

    fn route(&mut self, page: Page) -> Result<()> {
        let serial = page.serial();
        self.stats.pages_in += 1;

        if page.version() != 0 {
            let msg = format!(
                "Unsupported page structure version {} on logical stream {serial}",
                page.version()
            );
            if self.strict {
                bail!(msg);
            }
            log::warn!("{msg}");
            return Ok(());
        }

        let restart = match self.lanes.get(&serial) {
            None => true,
            Some(lane) => page.is_bos() && lane.decoder.is_eos()?.wait()?,
        };
        if restart {
            if let Some(old) = self.lanes.remove(&serial) {
                log::debug!("Logical stream {serial} restarts");
                self.retire(old)?;
            }
            self.lanes.insert(serial, self.open_lane(serial));
            self.stats.streams += 1;
        }

        let Some(lane) = self.lanes.get(&serial) else {
            return Ok(());
        };
        let decoder = lane.decoder.clone();
        let encoder = lane.encoder.clone();

        let accepted = decoder.page_in(page)?;
        let mut next = decoder.packet_out()?;
        if let PageIn::Discontinuity { expected, found } = accepted.wait()?? {
            let msg = format!(
                "Page sequence gap on logical stream {serial}: expected {expected}, found {found}"
            );
            if self.strict {
                bail!(msg);
            }
            log::warn!("{msg}");
        }

        loop {
            match next.wait()? {
                PacketOut::NeedMore => break,
                PacketOut::Gap => {
                    self.stats.gaps += 1;
                    next = decoder.packet_out()?;
                }
                PacketOut::Packet(packet) => {
                    next = decoder.packet_out()?;
                    self.stats.packets += 1;
                    encoder.packet_in(packet)?.wait()??;
                }
            }
        }

        self.drain(&encoder)
    }

    fn open_lane(&self, serial: i32) -> Lane {
        let config = StreamConfig {
            page_fill: self.page_fill,
            ..StreamConfig::default()
        };
        Lane {
            decoder: StreamHandle::new(self.executor, StreamState::with_config(serial, config.clone())),
            encoder: StreamHandle::new(self.executor, StreamState::with_config(serial, config)),
        }
    }

    fn retire(&mut self, lane: Lane) -> Result<()> {
        self.drain(&lane.encoder)?;
        let decoder = lane.decoder.close()?;
        let encoder = lane.encoder.close()?;
        decoder.wait()?;
        encoder.wait()?;
        Ok(())
    }

    fn drain(&mut self, encoder: &StreamHandle) -> Result<()> {
        loop {
            match encoder.flush()?.wait()? {
                Some(page) => {
                    self.writer.write_all(page.header())?;
                    self.writer.write_all(page.body())?;
                    self.stats.pages_out += 1;
                }
                None => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use oggcore::process::demux::{DemuxEvent, Demuxer};
    use oggcore::process::mux::Muxer;
    use oggcore::structs::packet::Packet;

    use super::*;

    fn payloads(data: &[u8]) -> Result<Vec<(i32, Bytes)>> {
        let mut demuxer = Demuxer::default();
        demuxer.set_fail_level(log::Level::Warn);
        demuxer.push_bytes(data)?;
        let mut out = Vec::new();
        for event in demuxer {
            if let DemuxEvent::Packet { serial, packet } = event? {
                out.push((serial, packet.into_payload()));
            }
        }
        Ok(out)
    }

    fn final_granules(data: &[u8]) -> Result<Vec<(i32, i64)>> {
        let mut sync = SyncState::default();
        sync.write(data)?;
        let mut out = Vec::new();
        while let SyncOut::Page(page) = sync.page_out() {
            if page.is_eos() {
                out.push((page.serial(), page.granule_position()));
            }
        }
        Ok(out)
    }

    #[test]
    fn remux_preserves_packets() -> Result<()> {
        let mut mux = Muxer::default();
        mux.add_stream(Some(70))?;
        mux.add_stream(Some(71))?;
        for i in 0..30i64 {
            let eos = i == 29;
            let audio = Packet::new(vec![i as u8; 700])
                .with_granule_position(i * 960)
                .with_eos(eos);
            let data = Packet::new(vec![!(i as u8); 90])
                .with_granule_position(i)
                .with_eos(eos);
            mux.write_packet(70, &audio, false)?;
            mux.write_packet(71, &data, false)?;
        }
        mux.finish()?;
        let input: Vec<u8> = mux.take_output().concat();

        let executor = Executor::new(ExecutorConfig {
            workers: 3,
            ..ExecutorConfig::default()
        })?;
        let mut output = Vec::new();
        let mut ctx = RemuxContext::new(&executor, &mut output, 4096, true);
        for chunk in input.chunks(1000) {
            ctx.push_chunk(Bytes::copy_from_slice(chunk))?;
        }
        let stats = ctx.finish()?;

        assert_eq!(stats.streams, 2);
        assert_eq!(stats.packets, 60);
        assert_eq!(stats.gaps, 0);

        assert_eq!(payloads(&input)?, payloads(&output)?);
        assert_eq!(final_granules(&input)?, final_granules(&output)?);
        assert!(stats.pages_out >= stats.pages_in);
        Ok(())
    }

    fn remux(input: &[u8], strict: bool) -> Result<(RemuxStats, Vec<u8>)> {
        let executor = Executor::new(ExecutorConfig::default())?;
        let mut output = Vec::new();
        let mut ctx = RemuxContext::new(&executor, &mut output, 4096, strict);
        ctx.push_chunk(Bytes::copy_from_slice(input))?;
        let stats = ctx.finish()?;
        Ok((stats, output))
    }

    #[test]
    fn unsupported_version_page_is_dropped() -> Result<()> {
        let mut mux = Muxer::default();
        mux.add_stream(Some(5))?;
        for i in 0..3u8 {
            let packet = Packet::new(vec![i; 40]).with_eos(i == 2);
            mux.write_packet(5, &packet, true)?;
        }
        mux.finish()?;
        let mut pages = mux.take_pages();
        assert_eq!(pages.len(), 3);

        // mark the middle page as a future structure version
        let mut header = pages[1].header().to_vec();
        header[4] = 1;
        let mut altered = Page::from_parts(header, pages[1].body().clone())?;
        altered.set_checksum();
        pages[1] = altered;
        let input: Vec<u8> = pages.iter().flat_map(|p| p.to_buffer().to_vec()).collect();

        let (stats, output) = remux(&input, false)?;
        assert_eq!(stats.pages_in, 3);
        assert_eq!(stats.packets, 2);
        let kept: Vec<Bytes> = payloads(&output)?.into_iter().map(|(_, p)| p).collect();
        assert_eq!(kept, vec![Bytes::from(vec![0u8; 40]), Bytes::from(vec![2u8; 40])]);

        assert!(remux(&input, true).is_err());
        Ok(())
    }

    #[test]
    fn finish_recovers_page_behind_stray_capture() -> Result<()> {
        let mut mux = Muxer::default();
        mux.add_stream(Some(9))?;
        mux.write_packet(9, &Packet::new(vec![7u8; 12]).with_eos(true), true)?;
        mux.finish()?;

        let mut input = b"OggS".to_vec();
        input.resize(26, 0);
        input.push(255);
        input.extend(mux.take_output().concat());

        let (stats, output) = remux(&input, false)?;
        assert_eq!(stats.skipped_bytes, 27);
        assert_eq!(stats.packets, 1);
        assert_eq!(payloads(&output)?, vec![(9, Bytes::from(vec![7u8; 12]))]);
        Ok(())
    }
}
