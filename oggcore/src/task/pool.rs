use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;

use log::{debug, trace};
use parking_lot::Mutex;

use crate::task::ExecutorConfig;
use crate::utils::errors::TaskError;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of worker threads.
///
/// Cloning yields another handle to the same pool. Workers stop once
/// [`shutdown`](Self::shutdown) is called or the last handle is dropped;
/// jobs already queued at that point still run.
#[derive(Debug, Clone)]
pub struct Executor {
    inner: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    retained: Arc<AtomicUsize>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Result<Self, TaskError> {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));

        let count = config.workers.max(1);
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let rx = Arc::clone(&rx);
            let handle = thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name))
                .spawn(move || worker_loop(&rx))?;
            workers.push(handle);
        }

        debug!("Executor started with {count} workers");

        Ok(Self {
            inner: Arc::new(Shared {
                sender: Mutex::new(Some(tx)),
                workers: Mutex::new(workers),
                retained: Arc::new(AtomicUsize::new(0)),
                config,
            }),
        })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    /// Total bytes of caller buffers currently held alive by queued or
    /// running operations.
    pub fn retained_bytes(&self) -> usize {
        self.inner.retained.load(Ordering::Acquire)
    }

    /// Stops accepting work, lets queued jobs finish and joins the workers.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.sender.lock().is_none()
    }

    pub(crate) fn spawn(&self, job: Job) -> Result<(), TaskError> {
        let sender = self.inner.sender.lock();
        match sender.as_ref() {
            Some(tx) => tx.send(job).map_err(|_| TaskError::Shutdown),
            None => Err(TaskError::Shutdown),
        }
    }

    pub(crate) fn retained_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.inner.retained)
    }
}

impl Shared {
    fn shutdown(&self) {
        if self.sender.lock().take().is_none() {
            return;
        }

        let current = thread::current().id();
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            // a worker cannot join itself
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                log::error!("Executor worker terminated abnormally");
            }
        }
        debug!("Executor shut down");
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(rx: &Mutex<mpsc::Receiver<Job>>) {
    loop {
        let job = rx.lock().recv();
        match job {
            Ok(job) => job(),
            Err(_) => break,
        }
    }
    trace!("Worker {:?} exiting", thread::current().name());
}
