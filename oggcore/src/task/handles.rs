use bytes::Bytes;

use crate::process::stream::{PacketOut, PageIn, StreamState};
use crate::process::sync::{SyncOut, SyncState};
use crate::structs::packet::Packet;
use crate::structs::page::Page;
use crate::task::completion::Completion;
use crate::task::guard::BufferGuard;
use crate::task::pool::Executor;
use crate::task::queue::Dispatcher;
use crate::utils::errors::{StreamError, SyncError, TaskError};

/// Off-thread access to a [`SyncState`].
///
/// Input chunks are taken as [`Bytes`] and held by a [`BufferGuard`] until
/// the append has completed, so the caller can drop or reuse its own handle
/// to the chunk right after submitting.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    dispatcher: Dispatcher<SyncState>,
}

impl SyncHandle {
    pub fn new(executor: &Executor, state: SyncState) -> Self {
        Self {
            dispatcher: Dispatcher::new(executor, state),
        }
    }

    pub fn write(
        &self,
        data: impl Into<Bytes>,
    ) -> Result<Completion<Result<usize, SyncError>>, TaskError> {
        let data = data.into();
        let mut guard = BufferGuard::new(self.dispatcher.executor());
        guard.retain(&data);
        self.dispatcher.submit(guard, move |sync| sync.write(&data))
    }

    pub fn page_out(&self) -> Result<Completion<SyncOut>, TaskError> {
        self.unguarded(SyncState::page_out)
    }

    /// Extraction at end of input; see [`SyncState::finish`].
    pub fn finish(&self) -> Result<Completion<SyncOut>, TaskError> {
        self.unguarded(SyncState::finish)
    }

    pub fn reset(&self) -> Result<Completion<()>, TaskError> {
        self.unguarded(SyncState::reset)
    }

    pub fn buffered(&self) -> Result<Completion<usize>, TaskError> {
        self.unguarded(|sync| sync.buffered())
    }

    /// Releases the accumulator after pending operations have run.
    pub fn close(&self) -> Result<Completion<()>, TaskError> {
        self.dispatcher.close()
    }

    pub fn is_closed(&self) -> bool {
        self.dispatcher.is_closed()
    }

    fn unguarded<R, F>(&self, op: F) -> Result<Completion<R>, TaskError>
    where
        R: Send + 'static,
        F: FnOnce(&mut SyncState) -> R + Send + 'static,
    {
        let guard = BufferGuard::new(self.dispatcher.executor());
        self.dispatcher.submit(guard, op)
    }
}

/// Off-thread access to a [`StreamState`].
///
/// Pages and packets passed in are retained for the duration of the
/// operation; pages and packets handed back own their bytes.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    dispatcher: Dispatcher<StreamState>,
    serial: i32,
}

impl StreamHandle {
    pub fn new(executor: &Executor, state: StreamState) -> Self {
        let serial = state.serial();
        Self {
            dispatcher: Dispatcher::new(executor, state),
            serial,
        }
    }

    pub fn serial(&self) -> i32 {
        self.serial
    }

    pub fn page_in(&self, page: Page) -> Result<Completion<Result<PageIn, StreamError>>, TaskError> {
        let mut guard = BufferGuard::new(self.dispatcher.executor());
        guard.retain_page(&page);
        self.dispatcher.submit(guard, move |stream| stream.page_in(&page))
    }

    pub fn packet_out(&self) -> Result<Completion<PacketOut>, TaskError> {
        self.unguarded(StreamState::packet_out)
    }

    pub fn packet_peek(&self) -> Result<Completion<PacketOut>, TaskError> {
        self.unguarded(|stream| stream.packet_peek())
    }

    pub fn packet_in(&self, packet: Packet) -> Result<Completion<Result<(), StreamError>>, TaskError> {
        let mut guard = BufferGuard::new(self.dispatcher.executor());
        guard.retain_packet(&packet);
        self.dispatcher.submit(guard, move |stream| stream.packet_in(&packet))
    }

    pub fn page_out(&self) -> Result<Completion<Option<Page>>, TaskError> {
        self.unguarded(StreamState::page_out)
    }

    pub fn page_out_fill(&self, fill: usize) -> Result<Completion<Option<Page>>, TaskError> {
        self.unguarded(move |stream| stream.page_out_fill(fill))
    }

    pub fn flush(&self) -> Result<Completion<Option<Page>>, TaskError> {
        self.unguarded(StreamState::flush)
    }

    pub fn flush_fill(&self, fill: usize) -> Result<Completion<Option<Page>>, TaskError> {
        self.unguarded(move |stream| stream.flush_fill(fill))
    }

    pub fn reset(&self) -> Result<Completion<()>, TaskError> {
        self.unguarded(StreamState::reset)
    }

    pub fn is_eos(&self) -> Result<Completion<bool>, TaskError> {
        self.unguarded(|stream| stream.is_eos())
    }

    /// Releases the stream after pending operations have run.
    pub fn close(&self) -> Result<Completion<()>, TaskError> {
        self.dispatcher.close()
    }

    pub fn is_closed(&self) -> bool {
        self.dispatcher.is_closed()
    }

    fn unguarded<R, F>(&self, op: F) -> Result<Completion<R>, TaskError>
    where
        R: Send + 'static,
        F: FnOnce(&mut StreamState) -> R + Send + 'static,
    {
        let guard = BufferGuard::new(self.dispatcher.executor());
        self.dispatcher.submit(guard, op)
    }
}
