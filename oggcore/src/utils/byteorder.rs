pub trait WriteBytesLe {
    fn write_le(&self, dst: &mut Vec<u8>);
}

/// Fixed serialized size of a wire structure, declared with `#[wire_len(N)]`.
pub trait WireLen {
    const WIRE_LEN: usize;
}

macro_rules! impl_num_le {
    ($($t:ty),+) => { $(
        impl WriteBytesLe for $t { #[inline] fn write_le(&self, dst: &mut Vec<u8>) { dst.extend_from_slice(&self.to_le_bytes()); }}
    )+ }
}

impl_num_le!(u8, i8, u16, i16, u32, i32, u64, i64);

impl<T: WriteBytesLe, const N: usize> WriteBytesLe for [T; N] {
    #[inline]
    fn write_le(&self, dst: &mut Vec<u8>) {
        self.iter().for_each(|item| item.write_le(dst));
    }
}

impl<T: WriteBytesLe> WriteBytesLe for Vec<T> {
    #[inline]
    fn write_le(&self, dst: &mut Vec<u8>) {
        self.iter().for_each(|item| item.write_le(dst));
    }
}

#[cfg(test)]
mod tests {
    use crate::utils::byteorder::{WireLen, WriteBytesLe};
    use oggcore_macros::{ToBytes, wire_len};

    #[wire_len(11)]
    #[derive(ToBytes)]
    struct Mini {
        a: u16,
        b: i32,
        tag: [u8; 4],
        c: u8,
    }

    #[test]
    fn to_bytes_little_endian() {
        let s = Mini {
            a: 0x1234,
            b: -2,
            tag: *b"OggS",
            c: 7,
        };

        let mut out = Vec::new();
        s.write_le(&mut out);

        let expected = [0x34, 0x12, 0xFE, 0xFF, 0xFF, 0xFF, b'O', b'g', b'g', b'S', 7];
        assert_eq!(&out[..], &expected);
        assert_eq!(out.len(), Mini::WIRE_LEN);
    }
}
