use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;

use crate::utils::errors::TaskError;

pub(crate) type Resolver<T> = oneshot::Sender<Result<T, TaskError>>;

/// Pending result of a dispatched operation.
///
/// Await it from async code, block on it with [`wait`](Self::wait), or poll
/// it with [`try_take`](Self::try_take). Resolves to [`TaskError::Aborted`]
/// if the operation was dropped without producing a result.
#[derive(Debug)]
#[must_use = "the operation result is only observable through its completion"]
pub struct Completion<T> {
    rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> Completion<T> {
    pub(crate) fn pair() -> (Resolver<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Blocks the calling thread until the operation finishes.
    ///
    /// Must not be called from a worker of the executor that runs the
    /// operation.
    pub fn wait(self) -> Result<T, TaskError> {
        futures::executor::block_on(self)
    }

    /// Returns the result if it is already available.
    pub fn try_take(&mut self) -> Option<Result<T, TaskError>> {
        match self.rx.try_recv() {
            Ok(Some(result)) => Some(result),
            Ok(None) => None,
            Err(oneshot::Canceled) => Some(Err(TaskError::Aborted)),
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(TaskError::Aborted)))
    }
}
