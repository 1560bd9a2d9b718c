//! Ogg page framing.
//!
//! ## Layout
//!
//! | Offset | Size | Field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 4    | capture pattern `OggS`                  |
//! | 4      | 1    | stream structure version (0)            |
//! | 5      | 1    | header type (continued / BOS / EOS)     |
//! | 6      | 8    | granule position (signed, LE)           |
//! | 14     | 4    | bitstream serial number (LE)            |
//! | 18     | 4    | page sequence number (LE)               |
//! | 22     | 4    | CRC-32 over the whole page (LE)         |
//! | 26     | 1    | number of lacing values                 |
//! | 27     | n    | lacing values, one byte each            |
//!
//! The body follows the header and is exactly as long as the sum of the
//! lacing values.

use bytes::{Bytes, BytesMut};
use oggcore_macros::{ToBytes, wire_len};

use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::byteorder::{WireLen, WriteBytesLe};
use crate::utils::crc::OGG_PAGE_CRC;
use crate::utils::errors::PageError;

/// Capture pattern opening every page.
pub const CAPTURE_PATTERN: [u8; 4] = *b"OggS";

/// Header type flag: the first packet on the page continues one from the previous page.
pub const HEADER_TYPE_CONTINUED: u8 = 0x01;

/// Header type flag: first page of a logical stream.
pub const HEADER_TYPE_BOS: u8 = 0x02;

/// Header type flag: last page of a logical stream.
pub const HEADER_TYPE_EOS: u8 = 0x04;

/// Maximum number of lacing values on one page.
pub const MAX_SEGMENTS: usize = 255;

/// Largest possible header: fixed part plus a full lacing table.
pub const MAX_HEADER_LEN: usize = PageHeader::WIRE_LEN + MAX_SEGMENTS;

/// Largest possible body: every lacing value at 255.
pub const MAX_BODY_LEN: usize = MAX_SEGMENTS * 255;

/// Byte offset of the checksum field inside the header.
pub const CHECKSUM_OFFSET: usize = 22;

/// Fixed part of a page header, in wire order.
#[wire_len(27)]
#[derive(ToBytes, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub capture: [u8; 4],
    pub version: u8,
    pub header_type: u8,
    pub granule_position: i64,
    pub serial: i32,
    pub sequence: u32,
    pub checksum: u32,
    pub segment_count: u8,
}

impl PageHeader {
    /// Reads the fixed header fields from the start of `bytes`.
    ///
    /// Only the capture pattern and the length of the fixed part are checked;
    /// lacing table and body are validated by [`Page::from_parts`].
    pub fn parse(bytes: &[u8]) -> Result<Self, PageError> {
        if bytes.len() < Self::WIRE_LEN {
            return Err(PageError::HeaderTooShort(bytes.len()));
        }

        let short = |_| PageError::HeaderTooShort(bytes.len());
        let reader = &mut BsIoSliceReader::from_slice(bytes);

        let mut capture = [0u8; 4];
        reader.get_bytes(&mut capture).map_err(short)?;
        if capture != CAPTURE_PATTERN {
            return Err(PageError::InvalidCapture(capture));
        }

        let version: u8 = reader.get_n(8).map_err(short)?;
        let header_type: u8 = reader.get_n(8).map_err(short)?;
        let granule_position: u64 = reader.get_n(64).map_err(short)?;
        let serial: u32 = reader.get_n(32).map_err(short)?;
        let sequence: u32 = reader.get_n(32).map_err(short)?;
        let checksum: u32 = reader.get_n(32).map_err(short)?;
        let segment_count: u8 = reader.get_n(8).map_err(short)?;

        Ok(Self {
            capture,
            version,
            header_type,
            granule_position: granule_position as i64,
            serial: serial as i32,
            sequence,
            checksum,
            segment_count,
        })
    }

    /// Serializes the fixed part followed by `lacing`.
    pub fn to_bytes(&self, lacing: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIRE_LEN + lacing.len());
        self.write_le(&mut out);
        out.extend_from_slice(lacing);
        out
    }
}

/// One physical page: a header span and a body span.
///
/// Both spans are reference-counted views, so a page stays valid for as long
/// as any clone of it is alive, no matter what happens to the buffer it was
/// cut from. `to_buffer` is a plain concatenation of the two.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    fields: PageHeader,
    header: Bytes,
    body: Bytes,
}

impl Page {
    /// Builds a page from caller-supplied header and body spans.
    ///
    /// The header must hold the fixed part plus exactly `segment_count`
    /// lacing values, and the body must be as long as the lacing values
    /// add up to. The checksum is not verified; see [`Page::verify_checksum`].
    pub fn from_parts(header: impl Into<Bytes>, body: impl Into<Bytes>) -> Result<Self, PageError> {
        let header = header.into();
        let body = body.into();

        let fields = PageHeader::parse(&header)?;

        let declared = fields.segment_count as usize;
        let actual = header.len() - PageHeader::WIRE_LEN;
        if declared != actual {
            return Err(PageError::SegmentTableMismatch { declared, actual });
        }

        let expected = lacing_sum(&header[PageHeader::WIRE_LEN..]);
        if expected != body.len() {
            return Err(PageError::BodyLengthMismatch {
                expected,
                actual: body.len(),
            });
        }

        Ok(Self::from_validated(fields, header, body))
    }

    pub(crate) fn from_validated(fields: PageHeader, header: Bytes, body: Bytes) -> Self {
        Self {
            fields,
            header,
            body,
        }
    }

    pub fn header(&self) -> &Bytes {
        &self.header
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn header_fields(&self) -> &PageHeader {
        &self.fields
    }

    pub fn version(&self) -> u8 {
        self.fields.version
    }

    pub fn is_continued(&self) -> bool {
        self.fields.header_type & HEADER_TYPE_CONTINUED != 0
    }

    pub fn is_bos(&self) -> bool {
        self.fields.header_type & HEADER_TYPE_BOS != 0
    }

    pub fn is_eos(&self) -> bool {
        self.fields.header_type & HEADER_TYPE_EOS != 0
    }

    pub fn granule_position(&self) -> i64 {
        self.fields.granule_position
    }

    pub fn serial(&self) -> i32 {
        self.fields.serial
    }

    pub fn sequence(&self) -> u32 {
        self.fields.sequence
    }

    pub fn checksum(&self) -> u32 {
        self.fields.checksum
    }

    pub fn segment_table(&self) -> &[u8] {
        &self.header[PageHeader::WIRE_LEN..]
    }

    /// Number of packets that end on this page.
    pub fn packets(&self) -> usize {
        self.segment_table().iter().filter(|&&v| v < 255).count()
    }

    /// Total on-wire length (header plus body).
    pub fn len(&self) -> usize {
        self.header.len() + self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exact on-wire bytes of this page: header immediately followed by body.
    pub fn to_buffer(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.len());
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.body);
        out.freeze()
    }

    pub fn compute_checksum(&self) -> u32 {
        OGG_PAGE_CRC.page_checksum(&self.header, &self.body)
    }

    pub fn verify_checksum(&self) -> bool {
        self.compute_checksum() == self.fields.checksum
    }

    /// Recomputes the checksum and patches it into the header.
    pub fn set_checksum(&mut self) {
        let crc = self.compute_checksum();
        let mut header = BytesMut::from(&self.header[..]);
        header[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        self.header = header.freeze();
        self.fields.checksum = crc;
    }
}

pub(crate) fn lacing_sum(lacing: &[u8]) -> usize {
    lacing.iter().map(|&v| v as usize).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(header_type: u8, lacing: &[u8]) -> Vec<u8> {
        PageHeader {
            capture: CAPTURE_PATTERN,
            version: 0,
            header_type,
            granule_position: 0x0102_0304_0506,
            serial: -5,
            sequence: 9,
            checksum: 0,
            segment_count: lacing.len() as u8,
        }
        .to_bytes(lacing)
    }

    #[test]
    fn fields_round_trip_through_wire_layout() -> anyhow::Result<()> {
        let page = Page::from_parts(header(HEADER_TYPE_BOS | HEADER_TYPE_EOS, &[3, 0]), &b"abc"[..])?;

        assert_eq!(page.header().len(), 29);
        assert_eq!(page.granule_position(), 0x0102_0304_0506);
        assert_eq!(page.serial(), -5);
        assert_eq!(page.sequence(), 9);
        assert!(page.is_bos());
        assert!(page.is_eos());
        assert!(!page.is_continued());
        assert_eq!(page.packets(), 2);
        Ok(())
    }

    #[test]
    fn to_buffer_concatenates_spans() -> anyhow::Result<()> {
        let hdr = header(0, &[5]);
        let page = Page::from_parts(hdr.clone(), &b"hello"[..])?;

        let mut expected = hdr;
        expected.extend_from_slice(b"hello");
        assert_eq!(&page.to_buffer()[..], &expected[..]);

        let empty = Page::from_parts(header(0, &[]), Bytes::new())?;
        assert_eq!(empty.to_buffer(), *empty.header());
        assert!(empty.body().is_empty());
        Ok(())
    }

    #[test]
    fn set_checksum_patches_header() -> anyhow::Result<()> {
        let mut page = Page::from_parts(header(0, &[4]), &b"data"[..])?;
        assert!(!page.verify_checksum());

        page.set_checksum();
        assert!(page.verify_checksum());
        assert_eq!(
            &page.header()[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4],
            &page.checksum().to_le_bytes()
        );
        Ok(())
    }

    #[test]
    fn rejects_malformed_spans() {
        assert_eq!(
            Page::from_parts(vec![0u8; 10], Bytes::new()),
            Err(PageError::HeaderTooShort(10))
        );

        let mut bad_capture = header(0, &[]);
        bad_capture[0] = b'X';
        assert!(matches!(
            Page::from_parts(bad_capture, Bytes::new()),
            Err(PageError::InvalidCapture(_))
        ));

        let mut truncated = header(0, &[1, 1]);
        truncated.pop();
        assert_eq!(
            Page::from_parts(truncated, Bytes::new()),
            Err(PageError::SegmentTableMismatch {
                declared: 2,
                actual: 1
            })
        );

        assert_eq!(
            Page::from_parts(header(0, &[2]), &b"x"[..]),
            Err(PageError::BodyLengthMismatch {
                expected: 2,
                actual: 1
            })
        );
    }
}
