//! Field reader for little-endian wire structures.
//!
//! Ogg header fields are byte aligned and little-endian; the reader keeps the
//! bit-level API of `bitstream_io` so multi-byte fields come out in native
//! integer form without manual shifting.

use std::io;

use bitstream_io::{BitRead, BitReader, LittleEndian, UnsignedInteger};

#[derive(Debug)]
pub struct BitstreamIoReader<R: io::Read + io::Seek> {
    bs: BitReader<R, LittleEndian>,
    len: u64,
}

pub type BsIoSliceReader<'a> = BitstreamIoReader<io::Cursor<&'a [u8]>>;

impl<R> BitstreamIoReader<R>
where
    R: io::Read + io::Seek,
{
    pub fn new(read: R, len_bytes: u64) -> Self {
        Self {
            bs: BitReader::new(read),
            len: len_bytes << 3,
        }
    }

    #[inline(always)]
    pub fn get_n<I: UnsignedInteger>(&mut self, n: u32) -> io::Result<I> {
        let avail = self.available()?;
        if n as u64 > avail {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "get_n({}): out of bounds bits at {}",
                    n,
                    self.bs.position_in_bits().unwrap_or(0)
                ),
            ));
        }
        self.bs.read_unsigned_var(n)
    }

    #[inline(always)]
    pub fn get_bytes(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.bs.read_bytes(buf)
    }

    pub fn available(&mut self) -> io::Result<u64> {
        let pos = self.position()?;
        Ok(self.len.saturating_sub(pos))
    }

    pub fn position(&mut self) -> io::Result<u64> {
        self.bs.position_in_bits()
    }
}

impl<'a> BsIoSliceReader<'a> {
    pub fn from_slice(buf: &'a [u8]) -> Self {
        Self::new(io::Cursor::new(buf), buf.len() as u64)
    }
}

#[test]
fn reads_little_endian_fields() -> io::Result<()> {
    let data = [0x4F, 0x67, 0x01, 0x02, 0x03, 0x04, 0xFF];
    let mut reader = BsIoSliceReader::from_slice(&data);

    let mut capture = [0u8; 2];
    reader.get_bytes(&mut capture)?;
    assert_eq!(&capture, b"Og");

    let value: u32 = reader.get_n(32)?;
    assert_eq!(value, 0x0403_0201);
    assert_eq!(reader.available()?, 8);

    assert!(reader.get_n::<u16>(16).is_err());
    Ok(())
}
