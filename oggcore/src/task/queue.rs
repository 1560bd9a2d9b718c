use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{error, trace};
use parking_lot::Mutex;

use crate::task::BusyPolicy;
use crate::task::completion::Completion;
use crate::task::guard::BufferGuard;
use crate::task::pool::Executor;
use crate::utils::errors::TaskError;

enum Slot<S> {
    Open(S),
    Closed,
    Poisoned,
}

/// Runs against the slot and returns the delivery of its result, which is
/// invoked only after the object's queue bookkeeping is done.
type Task<S> = Box<dyn FnOnce(&mut Slot<S>) -> Delivery + Send + 'static>;
type Delivery = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Open,
    Closed,
    Poisoned,
}

struct Control<S> {
    running: bool,
    status: Status,
    pending: VecDeque<Task<S>>,
}

struct Inner<S> {
    control: Mutex<Control<S>>,
    slot: Mutex<Slot<S>>,
}

/// Serializes operations on one state object over a shared [`Executor`].
///
/// At most one operation per object is in flight. Operations submitted while
/// one is running either wait in submission order and run back-to-back on the
/// same worker, or are refused with [`TaskError::Busy`], depending on the
/// executor's [`BusyPolicy`]. Submission itself never blocks on a running
/// operation.
///
/// An operation that panics poisons the object: queued and later operations
/// fail with [`TaskError::Poisoned`]. Other objects are not affected.
pub struct Dispatcher<S> {
    inner: Arc<Inner<S>>,
    executor: Executor,
}

impl<S> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            executor: self.executor.clone(),
        }
    }
}

impl<S> std::fmt::Debug for Dispatcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let control = self.inner.control.lock();
        f.debug_struct("Dispatcher")
            .field("running", &control.running)
            .field("status", &control.status)
            .field("pending", &control.pending.len())
            .finish()
    }
}

impl<S: Send + 'static> Dispatcher<S> {
    pub fn new(executor: &Executor, state: S) -> Self {
        Self {
            inner: Arc::new(Inner {
                control: Mutex::new(Control {
                    running: false,
                    status: Status::Open,
                    pending: VecDeque::new(),
                }),
                slot: Mutex::new(Slot::Open(state)),
            }),
            executor: executor.clone(),
        }
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Runs `op` against the state object off the calling thread.
    ///
    /// `guard` is released only after the result has been delivered.
    pub fn submit<R, F>(&self, guard: BufferGuard, op: F) -> Result<Completion<R>, TaskError>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        let (resolver, completion) = Completion::pair();

        let task: Task<S> = Box::new(move |slot: &mut Slot<S>| -> Delivery {
            let result = match slot {
                Slot::Open(state) => {
                    panic::catch_unwind(AssertUnwindSafe(|| op(state))).map_err(|_| TaskError::Aborted)
                }
                Slot::Closed => Err(TaskError::Closed),
                Slot::Poisoned => Err(TaskError::Poisoned),
            };

            if matches!(result, Err(TaskError::Aborted)) {
                error!("Operation panicked; state object is poisoned");
                *slot = Slot::Poisoned;
            }

            let delivery: Delivery = Box::new(move || {
                let _ = resolver.send(result);
                drop(guard);
            });
            delivery
        });

        self.enqueue(task, false)?;
        Ok(completion)
    }

    /// Tears the state object down once every operation submitted before
    /// this call has run. Later submissions fail with [`TaskError::Closed`].
    pub fn close(&self) -> Result<Completion<()>, TaskError> {
        let (resolver, completion) = Completion::pair();

        let task: Task<S> = Box::new(move |slot: &mut Slot<S>| -> Delivery {
            let result = match slot {
                Slot::Closed => Err(TaskError::Closed),
                Slot::Open(_) | Slot::Poisoned => {
                    *slot = Slot::Closed;
                    Ok(())
                }
            };
            let delivery: Delivery = Box::new(move || {
                let _ = resolver.send(result);
            });
            delivery
        });

        self.enqueue(task, true)?;
        Ok(completion)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.control.lock().status == Status::Closed
    }

    pub fn is_poisoned(&self) -> bool {
        self.inner.control.lock().status == Status::Poisoned
    }

    fn enqueue(&self, task: Task<S>, closing: bool) -> Result<(), TaskError> {
        let mut control = self.inner.control.lock();

        match control.status {
            Status::Closed => return Err(TaskError::Closed),
            Status::Poisoned if !closing => return Err(TaskError::Poisoned),
            _ => {}
        }

        if control.running {
            if self.executor.config().busy_policy == BusyPolicy::Reject && !closing {
                return Err(TaskError::Busy);
            }
            control.pending.push_back(task);
            if closing {
                control.status = Status::Closed;
            }
            trace!("Queued operation behind {} pending", control.pending.len() - 1);
            return Ok(());
        }

        control.running = true;
        let inner = Arc::clone(&self.inner);
        if let Err(err) = self.executor.spawn(Box::new(move || run(&inner, task))) {
            control.running = false;
            return Err(err);
        }
        if closing {
            control.status = Status::Closed;
        }
        Ok(())
    }
}

fn run<S>(inner: &Inner<S>, first: Task<S>) {
    let mut task = first;
    loop {
        let delivery = {
            let mut slot = inner.slot.lock();
            let delivery = task(&mut *slot);
            if matches!(*slot, Slot::Poisoned) {
                let mut control = inner.control.lock();
                if control.status == Status::Open {
                    control.status = Status::Poisoned;
                }
            }
            delivery
        };

        // the object is idle before its caller learns the result
        let next = {
            let mut control = inner.control.lock();
            let next = control.pending.pop_front();
            if next.is_none() {
                control.running = false;
            }
            next
        };

        delivery();

        match next {
            Some(next) => task = next,
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::task::ExecutorConfig;

    fn executor(busy_policy: BusyPolicy) -> anyhow::Result<Executor> {
        Ok(Executor::new(ExecutorConfig {
            workers: 4,
            busy_policy,
            ..ExecutorConfig::default()
        })?)
    }

    #[test]
    fn same_object_runs_in_submission_order() -> anyhow::Result<()> {
        let executor = executor(BusyPolicy::Queue)?;
        let dispatcher = Dispatcher::new(&executor, Vec::<usize>::new());

        let completions = (0..100)
            .map(|i| {
                dispatcher.submit(BufferGuard::new(&executor), move |log: &mut Vec<usize>| {
                    log.push(i);
                    log.len()
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (i, completion) in completions.into_iter().enumerate() {
            assert_eq!(completion.wait()?, i + 1);
        }

        let log = dispatcher.submit(BufferGuard::new(&executor), |log| log.clone())?.wait()?;
        assert_eq!(log, (0..100).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn reject_policy_refuses_second_operation() -> anyhow::Result<()> {
        let executor = executor(BusyPolicy::Reject)?;
        let dispatcher = Dispatcher::new(&executor, ());
        let (release, gate) = mpsc::channel::<()>();

        let blocked = dispatcher.submit(BufferGuard::new(&executor), move |_| {
            let _ = gate.recv_timeout(Duration::from_secs(5));
        })?;

        assert!(matches!(
            dispatcher.submit(BufferGuard::new(&executor), |_| ()),
            Err(TaskError::Busy)
        ));

        release.send(())?;
        blocked.wait()?;

        assert_eq!(dispatcher.submit(BufferGuard::new(&executor), |_| 1)?.wait()?, 1);
        Ok(())
    }

    #[test]
    fn reject_policy_accepts_after_awaited_result() -> anyhow::Result<()> {
        let executor = executor(BusyPolicy::Reject)?;
        let dispatcher = Dispatcher::new(&executor, 0usize);

        for expected in 1..=2000 {
            let count = dispatcher
                .submit(BufferGuard::new(&executor), |n: &mut usize| {
                    *n += 1;
                    *n
                })?
                .wait()?;
            assert_eq!(count, expected);
        }
        Ok(())
    }

    #[test]
    fn panic_poisons_only_its_object() -> anyhow::Result<()> {
        let executor = executor(BusyPolicy::Queue)?;
        let broken = Dispatcher::new(&executor, 0u32);
        let healthy = Dispatcher::new(&executor, 0u32);

        let aborted = broken.submit(BufferGuard::new(&executor), |_| -> u32 {
            panic!("operation failed");
        })?;
        assert!(matches!(aborted.wait(), Err(TaskError::Aborted)));

        let after = broken
            .submit(BufferGuard::new(&executor), |n| *n)
            .and_then(Completion::wait);
        assert!(matches!(after, Err(TaskError::Poisoned)));

        let ok = healthy.submit(BufferGuard::new(&executor), |n| {
            *n += 1;
            *n
        })?;
        assert_eq!(ok.wait()?, 1);

        broken.close()?.wait()?;
        assert!(broken.is_closed());
        Ok(())
    }

    #[test]
    fn close_runs_after_pending_work() -> anyhow::Result<()> {
        let executor = executor(BusyPolicy::Queue)?;
        let dispatcher = Dispatcher::new(&executor, String::new());

        let first = dispatcher.submit(BufferGuard::new(&executor), |s: &mut String| {
            s.push_str("done");
            s.clone()
        })?;
        let closed = dispatcher.close()?;

        assert!(matches!(
            dispatcher.submit(BufferGuard::new(&executor), |s| s.len()),
            Err(TaskError::Closed)
        ));
        assert!(matches!(dispatcher.close(), Err(TaskError::Closed)));

        assert_eq!(first.wait()?, "done");
        closed.wait()?;
        Ok(())
    }
}
