use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::MultiProgress;

use super::command::{Cli, SplitArgs};
use super::progress::spinner_for;
use crate::input::{CHUNK_SIZE, InputReader};
use oggcore::process::demux::{DemuxEvent, Demuxer};
use oggcore::structs::page::Page;

pub fn cmd_split(args: &SplitArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!(
        "Splitting {} into {}",
        args.input.display(),
        args.output_path.display()
    );

    fs::create_dir_all(&args.output_path).with_context(|| {
        format!(
            "Failed to create output directory {}",
            args.output_path.display()
        )
    })?;

    let mut input_reader = InputReader::new(&args.input)?;
    let mut demuxer = Demuxer::default();
    demuxer.set_fail_level(cli.fail_level());

    let pb = spinner_for(multi, "Splitting pages...")?;
    let mut outputs = StreamOutputs::new(&args.output_path);

    input_reader.process_chunks(CHUNK_SIZE, |chunk| {
        if let Some(pb) = &pb {
            pb.inc(chunk.len() as u64);
        }

        demuxer.push_bytes(chunk)?;
        for event in demuxer.by_ref() {
            if let DemuxEvent::Page { serial, page } = event? {
                outputs.write_page(serial, &page)?;
            }
        }
        Ok(true)
    })?;

    demuxer.end_of_input();
    for event in demuxer.by_ref() {
        if let DemuxEvent::Page { serial, page } = event? {
            outputs.write_page(serial, &page)?;
        }
    }

    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    for (path, pages) in outputs.finish()? {
        log::info!("Wrote {pages} pages to {}", path.display());
    }

    Ok(())
}

/// One output file per serial number, opened on first use.
struct StreamOutputs {
    dir: PathBuf,
    files: HashMap<i32, (PathBuf, BufWriter<File>, usize)>,
}

impl StreamOutputs {
    fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            files: HashMap::new(),
        }
    }

    fn write_page(&mut self, serial: i32, page: &Page) -> Result<()> {
        if !self.files.contains_key(&serial) {
            let path = self.dir.join(format!("{serial}.ogg"));
            let file = File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            log::debug!("Logical stream {serial} -> {}", path.display());
            self.files.insert(serial, (path, BufWriter::new(file), 0));
        }

        if let Some((_, writer, pages)) = self.files.get_mut(&serial) {
            writer.write_all(page.header())?;
            writer.write_all(page.body())?;
            *pages += 1;
        }
        Ok(())
    }

    fn finish(self) -> Result<Vec<(PathBuf, usize)>> {
        let mut written = Vec::with_capacity(self.files.len());
        for (_, (path, mut writer, pages)) in self.files {
            writer.flush()?;
            written.push((path, pages));
        }
        written.sort();
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use oggcore::process::mux::Muxer;
    use oggcore::structs::packet::Packet;

    use super::*;

    #[test]
    fn pages_land_in_per_serial_files() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("oggd-split-{}", std::process::id()));
        fs::create_dir_all(&dir)?;

        let mut mux = Muxer::default();
        mux.add_stream(Some(1))?;
        mux.add_stream(Some(2))?;
        mux.write_packet(1, &Packet::new(&b"one"[..]), true)?;
        mux.write_packet(2, &Packet::new(&b"two"[..]), true)?;
        mux.write_packet(1, &Packet::new(&b"uno"[..]).with_eos(true), true)?;
        let pages = mux.take_pages();

        let mut outputs = StreamOutputs::new(&dir);
        for page in &pages {
            outputs.write_page(page.serial(), page)?;
        }
        let written = outputs.finish()?;
        assert_eq!(written.len(), 2);

        let expected: Vec<u8> = pages
            .iter()
            .filter(|p| p.serial() == 1)
            .flat_map(|p| p.to_buffer().to_vec())
            .collect();
        assert_eq!(fs::read(dir.join("1.ogg"))?, expected);

        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
