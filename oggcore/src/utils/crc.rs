//! CRC validation for Ogg pages.
//!
//! Ogg pages carry a 32-bit CRC over the whole page (header with the checksum
//! field zeroed, followed by the body). The generator is the usual
//! `0x04C11DB7`, but unlike zlib's CRC-32 it is computed MSB-first with a zero
//! initial value and no final xor.

/// CRC algorithm specification with polynomial and initial value.
pub struct Algorithm<T> {
    poly: T,
    init: T,
}

/// CRC-32 algorithm used by the Ogg page checksum.
pub const CRC_OGG_PAGE_ALG: Algorithm<u32> = Algorithm {
    poly: 0x04c1_1db7,
    init: 0x0000_0000,
};

/// Shared table instance, built at compile time.
pub const OGG_PAGE_CRC: Crc32 = Crc32::new(&CRC_OGG_PAGE_ALG);

/// Computes CRC-32 checksum of a single byte using specified polynomial.
#[inline(always)]
pub const fn crc32(poly: u32, value: u8) -> u32 {
    let mut r = (value as u32) << 24;

    let mut i = 0;
    while i < 8 {
        r = (r << 1) ^ (((r >> 31) & 1) * poly);
        i += 1;
    }

    r
}

#[inline(always)]
const fn crc32_table(poly: u32) -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < table.len() {
        table[i] = crc32(poly, i as u8);
        i += 1;
    }

    table
}

#[derive(Debug)]
pub struct Crc32 {
    pub poly: u32,
    pub init: u32,
    table: [u32; 256],
}

impl Crc32 {
    pub const fn new(algorithm: &Algorithm<u32>) -> Self {
        Self {
            poly: algorithm.poly,
            init: algorithm.init,
            table: crc32_table(algorithm.poly),
        }
    }

    const fn table_entry(&self, index: u32) -> u32 {
        self.table[(index & 0xFF) as usize]
    }

    #[inline(always)]
    pub const fn update(&self, mut crc: u32, bytes: &[u8]) -> u32 {
        let mut i = 0;

        while i < bytes.len() {
            crc = (crc << 8) ^ self.table_entry((crc >> 24) ^ bytes[i] as u32);
            i += 1;
        }

        crc
    }

    /// Checksum of an Ogg page given as separate header and body spans.
    ///
    /// Bytes 22..26 of the header are treated as zero regardless of content.
    pub fn page_checksum(&self, header: &[u8], body: &[u8]) -> u32 {
        let (before, rest) = header.split_at(header.len().min(22));
        let after = rest.get(4..).unwrap_or(&[]);

        let mut crc = self.update(self.init, before);
        crc = self.update(crc, &[0u8; 4][..rest.len().min(4)]);
        crc = self.update(crc, after);
        self.update(crc, body)
    }
}
