#![doc = include_str!("../README.md")]
//!
//! ## Technical Overview
//!
//! Synchronizer and logical-stream multiplexer for Ogg bitstreams, plus a
//! task layer that runs both off the caller's thread.
//!
//! ### Bitstream Organization
//!
//! **Physical stream**: a sequence of pages, each opening with the `OggS`
//! capture pattern and protected by a CRC-32.
//! **Logical streams**: pages carry a serial number; the pages of one serial
//! form a logical stream whose packets are laced across page boundaries.
//!
//! ### Packet Lacing
//!
//! A packet is split into 255-byte segments terminated by one shorter
//! segment, so a packet that is an exact multiple of 255 bytes ends with a
//! zero-length segment. A page holds at most 255 segments.
//!
//! ## Quick Start
//!
//! 1. Recover pages from raw bytes using [`process::sync::SyncState`]
//! 2. Reassemble packets per serial using [`process::stream::StreamState`]
//! 3. Or let [`process::demux::Demuxer`] do both for a multiplexed file
//!
//! ```rust
//! use oggcore::process::demux::{DemuxEvent, Demuxer};
//! use oggcore::process::mux::Muxer;
//! use oggcore::structs::packet::Packet;
//!
//! // Build a small two-packet stream
//! let mut muxer = Muxer::default();
//! let serial = muxer.add_stream(None)?;
//! muxer.write_packet(serial, &Packet::new(&b"header"[..]).with_granule_position(0), true)?;
//! muxer.write_packet(serial, &Packet::new(&b"data"[..]).with_eos(true), true)?;
//! let bytes: Vec<u8> = muxer.take_output().concat();
//!
//! // Read it back
//! let mut demuxer = Demuxer::default();
//! demuxer.push_bytes(&bytes)?;
//!
//! let mut packets = 0;
//! for event in demuxer {
//!     match event? {
//!         DemuxEvent::Packet { packet, .. } => {
//!             packets += 1;
//!             assert!(packet.bytes() > 0);
//!         }
//!         DemuxEvent::LostSync { skipped } => eprintln!("skipped {skipped} bytes"),
//!         _ => {}
//!     }
//! }
//! assert_eq!(packets, 2);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Processing stages for Ogg bitstreams.
///
/// 1. **Synchronization** ([`process::sync`]): Recovers page boundaries from
///    arbitrarily chunked byte input.
///
/// 2. **Logical Streams** ([`process::stream`]): Packet assembly from pages
///    and page construction from packets.
///
/// 3. **Demux / Mux** ([`process::demux`], [`process::mux`]): Multi-stream
///    routing and interleaving.
pub mod process;

/// Data structures representing Ogg format components.
///
/// - **Pages** ([`structs::page`]): Header and body spans of one physical page
/// - **Packets** ([`structs::packet`]): Payload and framing metadata
pub mod structs;

/// Off-thread execution of sync and stream operations.
///
/// - **Executor** ([`task::pool`]): Worker pool
/// - **Dispatcher** ([`task::queue`]): Per-object operation ordering
/// - **Completions** ([`task::completion`]): Result delivery
/// - **Buffer Guards** ([`task::guard`]): Input span retention
/// - **Handles** ([`task::handles`]): Typed wrappers per state object
pub mod task;

/// Utility functions and supporting infrastructure.
///
/// - **CRC** ([`utils::crc`]): Page checksum
/// - **Byte Order** ([`utils::byteorder`]): Little-endian serialization
/// - **Bitstream I/O** ([`utils::bitstream_io`]): Header field reading
/// - **Error Handling** ([`utils::errors`]): Error types
/// - **Serial Numbers** ([`utils::serial`]): Process-wide serial counter
pub mod utils;
