//! Utility functions and supporting infrastructure.
//!
//! Provides the page CRC, little-endian wire serialization, header field
//! reading, error types and the process-wide serial counter.

pub mod bitstream_io;
pub mod byteorder;
pub mod crc;
pub mod errors;
pub mod serial;
