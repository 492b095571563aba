use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{Receiver, Selector, Sender};
use parking_lot::{Condvar, Mutex};

/// Unit of work run by a [`TaskPool`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    /// Only picked up when no normal job is waiting.
    Low,
}

#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn add(&self) {
        *self.count.lock() += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

struct Channels {
    normal: Sender<Job>,
    low: Sender<Job>,
}

/// Small pool of worker threads fed through flume channels.
///
/// Tracks how many jobs are queued or running so callers can wait for the
/// pool to drain with a timeout.
pub struct TaskPool {
    channels: Mutex<Option<Channels>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<Pending>,
}

impl TaskPool {
    pub fn new(workers: usize, name: &str) -> Self {
        let (normal_tx, normal_rx) = flume::unbounded::<Job>();
        let (low_tx, low_rx) = flume::unbounded::<Job>();
        let pending = Arc::new(Pending::default());

        let handles = (0..workers.max(1))
            .filter_map(|i| {
                let normal = normal_rx.clone();
                let low = low_rx.clone();
                let pending = pending.clone();
                let spawned = thread::Builder::new()
                    .name(format!("{name}-{i}"))
                    .spawn(move || worker_loop(normal, low, pending));
                match spawned {
                    Ok(handle) => Some(handle),
                    Err(err) => {
                        tracing::error!(error = %err, "failed to spawn log worker");
                        None
                    }
                }
            })
            .collect::<Vec<_>>();

        let channels = if handles.is_empty() {
            None
        } else {
            Some(Channels {
                normal: normal_tx,
                low: low_tx,
            })
        };

        Self {
            channels: Mutex::new(channels),
            workers: Mutex::new(handles),
            pending,
        }
    }

    /// Queues `job`. Hands it back when the pool is shut down.
    pub fn spawn(&self, priority: Priority, job: Job) -> Result<(), Job> {
        let channels = self.channels.lock();
        let Some(channels) = channels.as_ref() else {
            return Err(job);
        };
        let sender = match priority {
            Priority::Normal => &channels.normal,
            Priority::Low => &channels.low,
        };
        self.pending.add();
        sender.send(job).map_err(|err| {
            self.pending.done();
            err.into_inner()
        })
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize {
        *self.pending.count.lock()
    }

    /// Blocks until no job is pending or `timeout` passes. True when idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.pending.count.lock();
        while *count > 0 {
            if self.pending.idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.channels.lock().is_some()
    }

    /// Stops accepting jobs, lets the workers finish what is queued and joins
    /// them.
    pub fn shutdown(&self) {
        self.channels.lock().take();
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                // A worker cannot join itself; it exits once the channels drain.
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("log worker panicked outside of a job");
            }
        }
    }

    /// Stops accepting jobs and lets go of the workers without joining them.
    ///
    /// For a pool with a job stuck in a sink: each worker still finishes what
    /// it holds, then exits on its own once the queues are empty.
    pub fn detach(&self) -> usize {
        self.channels.lock().take();
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        handles.len()
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(job: Job, pending: &Pending) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        tracing::error!("log task panicked");
    }
    pending.done();
}

fn worker_loop(normal: Receiver<Job>, low: Receiver<Job>, pending: Arc<Pending>) {
    loop {
        if let Ok(job) = normal.try_recv() {
            run(job, &pending);
            continue;
        }
        if let Ok(job) = low.try_recv() {
            run(job, &pending);
            continue;
        }

        let next = Selector::new()
            .recv(&normal, |r| r.ok())
            .recv(&low, |r| r.ok())
            .wait();
        match next {
            Some(job) => run(job, &pending),
            // One side disconnected; drain whatever is left on the other.
            None => {
                while let Ok(job) = normal.try_recv().or_else(|_| low.try_recv()) {
                    run(job, &pending);
                }
                if normal.is_disconnected() && low.is_disconnected() {
                    return;
                }
            }
        }
    }
}
