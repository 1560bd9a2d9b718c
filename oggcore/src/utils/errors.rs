#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err.into());
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    #[error("Page header too short: {0} bytes, need at least 27")]
    HeaderTooShort(usize),

    #[error("Invalid capture pattern {0:02X?}, expected \"OggS\"")]
    InvalidCapture([u8; 4]),

    #[error("Segment table mismatch: header declares {declared} segments, header holds {actual}")]
    SegmentTableMismatch { declared: usize, actual: usize },

    #[error("Body length mismatch: lacing values sum to {expected}, body has {actual} bytes")]
    BodyLengthMismatch { expected: usize, actual: usize },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error(
        "Sync buffer limit exceeded: {buffered} bytes buffered + {incoming} incoming > {limit}"
    )]
    BufferLimit {
        buffered: usize,
        incoming: usize,
        limit: usize,
    },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Page serial {found} does not belong to logical stream {expected}")]
    SerialMismatch { expected: i32, found: i32 },

    #[error("Unsupported page structure version {0}")]
    UnsupportedVersion(u8),

    #[error("Packet submitted after end-of-stream on logical stream {0}")]
    AfterEndOfStream(i32),

    #[error(
        "Stream buffer limit exceeded on logical stream {serial}: {buffered} bytes buffered + {incoming} incoming > {limit}"
    )]
    BufferLimit {
        serial: i32,
        buffered: usize,
        incoming: usize,
        limit: usize,
    },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DemuxError {
    #[error("Lost sync: skipped {0} bytes of non-page data")]
    LostSync(usize),

    #[error("Page sequence gap on logical stream {serial}: expected {expected}, found {found}")]
    PageGap {
        serial: i32,
        expected: u32,
        found: u32,
    },

    #[error("Packet lost on logical stream {0}")]
    PacketGap(i32),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

#[derive(thiserror::Error, Debug)]
pub enum MuxError {
    #[error("Unknown logical stream {0}")]
    UnknownStream(i32),

    #[error("Logical stream {0} already exists")]
    DuplicateStream(i32),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("Failed to write output: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum TaskError {
    #[error("State object busy: an operation is already in flight")]
    Busy,

    #[error("State object has been closed")]
    Closed,

    #[error("State object is unusable after an aborted operation")]
    Poisoned,

    #[error("Executor has been shut down")]
    Shutdown,

    #[error("Operation aborted before delivering a result")]
    Aborted,

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
