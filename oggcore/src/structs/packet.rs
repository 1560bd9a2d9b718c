use bytes::Bytes;

/// Granule position of a packet that does not complete a page.
pub const GRANULE_UNDETERMINED: i64 = -1;

/// One logical unit of a stream.
///
/// The payload is a shared view; its length is the packet size and there is
/// no separate byte count to keep in sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    payload: Bytes,
    pub begin_of_stream: bool,
    pub end_of_stream: bool,
    pub granule_position: i64,
    pub sequence_number: i64,
}

impl Packet {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            begin_of_stream: false,
            end_of_stream: false,
            granule_position: GRANULE_UNDETERMINED,
            sequence_number: 0,
        }
    }

    pub fn with_bos(mut self, bos: bool) -> Self {
        self.begin_of_stream = bos;
        self
    }

    pub fn with_eos(mut self, eos: bool) -> Self {
        self.end_of_stream = eos;
        self
    }

    pub fn with_granule_position(mut self, granule_position: i64) -> Self {
        self.granule_position = granule_position;
        self
    }

    pub fn with_sequence_number(mut self, sequence_number: i64) -> Self {
        self.sequence_number = sequence_number;
        self
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Payload size in bytes.
    pub fn bytes(&self) -> usize {
        self.payload.len()
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.payload
    }
}

#[test]
fn byte_count_follows_payload() {
    let mut packet = Packet::new(&b"OpusHead"[..]).with_bos(true);
    assert_eq!(packet.bytes(), 8);
    assert_eq!(packet.granule_position, GRANULE_UNDETERMINED);

    packet.set_payload(vec![0u8; 300]);
    assert_eq!(packet.bytes(), 300);
    assert!(packet.begin_of_stream);
}
