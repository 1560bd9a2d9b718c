/// Page recovery from raw bytes.
///
/// Provides the [`SyncState`](sync::SyncState) for locating checksum-verified
/// pages in arbitrarily chunked input and skipping non-page data.
pub mod sync;

/// Packet assembly and page construction for one logical stream.
///
/// Provides the [`StreamState`](stream::StreamState), which turns
/// [`Page`](crate::structs::page::Page)s into
/// [`Packet`](crate::structs::packet::Packet)s and back.
pub mod stream;

/// Demultiplexing of physical streams.
///
/// Provides the [`Demuxer`](demux::Demuxer), which routes pages to one
/// stream state per serial number and reports what it sees as
/// [`DemuxEvent`](demux::DemuxEvent)s.
pub mod demux;

/// Multiplexing of logical streams.
///
/// Provides the [`Muxer`](mux::Muxer) for interleaving several logical
/// streams into one output.
pub mod mux;

#[cfg(test)]
pub(crate) mod testing {
    use bytes::Bytes;

    use crate::structs::page::{CAPTURE_PATTERN, Page, PageHeader};

    /// Builds a checksummed page from explicit fields.
    pub(crate) fn build_page(
        serial: i32,
        sequence: u32,
        header_type: u8,
        granule_position: i64,
        lacing: &[u8],
        body: &[u8],
    ) -> Page {
        let header = PageHeader {
            capture: CAPTURE_PATTERN,
            version: 0,
            header_type,
            granule_position,
            serial,
            sequence,
            checksum: 0,
            segment_count: lacing.len() as u8,
        }
        .to_bytes(lacing);

        let mut page = Page::from_parts(header, Bytes::copy_from_slice(body)).unwrap();
        page.set_checksum();
        page
    }

    /// A page holding one complete packet shorter than 255 bytes.
    pub(crate) fn simple_page(serial: i32, sequence: u32, payload: &[u8]) -> Page {
        build_page(
            serial,
            sequence,
            0,
            sequence as i64,
            &[payload.len() as u8],
            payload,
        )
    }
}
