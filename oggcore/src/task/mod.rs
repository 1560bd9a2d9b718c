//! Off-thread execution for sync and stream state objects.
//!
//! State objects are not reentrant, so every operation against one object is
//! funneled through a per-object queue and runs on a shared worker pool:
//!
//! ```text
//! caller ──submit──► [object queue] ──► [executor workers] ──► Completion
//! ```
//!
//! - **Executor** ([`pool`]): fixed set of worker threads
//! - **Dispatcher** ([`queue`]): at most one operation in flight per object
//! - **Completion** ([`completion`]): result delivery, blocking or as a future
//! - **BufferGuard** ([`guard`]): keeps input spans alive until the result is delivered
//! - **Handles** ([`handles`]): typed wrappers for [`SyncState`](crate::process::sync::SyncState)
//!   and [`StreamState`](crate::process::stream::StreamState)

pub mod completion;
pub mod guard;
pub mod handles;
pub mod pool;
pub mod queue;

use std::num::NonZeroUsize;

/// What happens when an operation is submitted while another one is in
/// flight on the same object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BusyPolicy {
    /// Run it after the in-flight operation, in submission order.
    #[default]
    Queue,
    /// Fail the submission with [`TaskError::Busy`](crate::utils::errors::TaskError::Busy).
    Reject,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub workers: usize,
    pub busy_policy: BusyPolicy,
    /// Worker threads are named `<thread_name>-<index>`.
    pub thread_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(2, NonZeroUsize::get),
            busy_policy: BusyPolicy::Queue,
            thread_name: "oggcore-worker".to_string(),
        }
    }
}
