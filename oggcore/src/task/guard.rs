use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;

use crate::structs::packet::Packet;
use crate::structs::page::Page;
use crate::task::pool::Executor;

/// Retained references to every caller span an operation reads.
///
/// A guard is created when an operation is submitted and dropped by the
/// worker after the operation's result has been handed to its completion.
/// While it lives, the spans cannot be freed or reused, whatever the caller
/// does with its own handles to them. Retained sizes are reported through
/// [`Executor::retained_bytes`].
#[derive(Debug)]
pub struct BufferGuard {
    spans: Vec<Bytes>,
    bytes: usize,
    counter: Arc<AtomicUsize>,
}

impl BufferGuard {
    pub fn new(executor: &Executor) -> Self {
        Self {
            spans: Vec::new(),
            bytes: 0,
            counter: executor.retained_counter(),
        }
    }

    pub fn retain(&mut self, span: &Bytes) {
        self.bytes += span.len();
        self.counter.fetch_add(span.len(), Ordering::AcqRel);
        self.spans.push(span.clone());
    }

    pub fn retain_page(&mut self, page: &Page) {
        self.retain(page.header());
        self.retain(page.body());
    }

    pub fn retain_packet(&mut self, packet: &Packet) {
        self.retain(packet.payload());
    }

    /// Number of retained spans.
    pub fn spans(&self) -> usize {
        self.spans.len()
    }

    /// Total retained bytes.
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for BufferGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ExecutorConfig;

    #[test]
    fn retention_is_counted_until_drop() -> anyhow::Result<()> {
        let executor = Executor::new(ExecutorConfig {
            workers: 1,
            ..ExecutorConfig::default()
        })?;

        let data = Bytes::from_static(b"retained span");
        let mut guard = BufferGuard::new(&executor);
        guard.retain(&data);
        guard.retain_packet(&Packet::new(vec![0u8; 100]));

        assert_eq!(guard.spans(), 2);
        assert_eq!(executor.retained_bytes(), data.len() + 100);

        drop(guard);
        assert_eq!(executor.retained_bytes(), 0);
        Ok(())
    }
}
