//! The swappable dispatch layer behind [`LoggerContext`](crate::LoggerContext).
//!
//! Exactly one [`LowLevelLogger`] is active at a time. Before startup it is a
//! [`DebuggingLogger`] or an [`AccumulatingLogger`]; while running it is the
//! [`BackgroundLogger`]; after shutdown a [`DebuggingLogger`] or the
//! [`DevNullLogger`]. The outgoing logger is told about its successor through
//! [`LowLevelLogger::on_release`] before it is dropped.

use std::io::{self, Write};
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::category::Level;
use crate::config::LoggerConfig;
use crate::message::{allocate, Message, MessageRef, Record};
use crate::sinks::LineHeader;
use crate::slab::SlabAllocator;
use crate::task_pool::{Priority, TaskPool};
use crate::user_logger::UserLogger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggerKind {
    Debugging,
    Accumulating,
    Background,
    DevNull,
}

pub trait LowLevelLogger: Send + Sync {
    fn kind(&self) -> LoggerKind;

    /// Builds and writes (or queues) one record.
    fn log(&self, record: Record<'_>);

    /// Takes over an already built message.
    fn dispatch(&self, message: MessageRef);

    /// Takes over messages logged before `self` became active, oldest first.
    fn replay(&self, history: Vec<MessageRef>) {
        for message in history {
            self.dispatch(message);
        }
    }

    fn flush(&self, synchronous: bool);

    /// Last call before `self` is dropped, with the logger replacing it.
    fn on_release(&self, next: &Arc<dyn LowLevelLogger>);
}

fn write_stderr(header: &LineHeader<'_>, text: &str) {
    let mut err = io::stderr().lock();
    let _ = writeln!(err, "{header}{text}");
}

fn echo_message(message: &Message) {
    write_stderr(&LineHeader::of(message), message.text());
}

/// Writes every record to stderr on the calling thread.
///
/// Needs no allocator, so it is safe to use while the process is still
/// starting or already tearing down.
#[derive(Debug, Default)]
pub struct DebuggingLogger;

impl DebuggingLogger {
    pub fn new() -> Self {
        Self
    }
}

impl LowLevelLogger for DebuggingLogger {
    fn kind(&self) -> LoggerKind {
        LoggerKind::Debugging
    }

    fn log(&self, record: Record<'_>) {
        let header = LineHeader {
            category: record.category,
            level: record.level,
            site: &record.site,
        };
        write_stderr(&header, &record.text());
    }

    fn dispatch(&self, message: MessageRef) {
        echo_message(&message);
    }

    fn flush(&self, _synchronous: bool) {
        let _ = io::stderr().flush();
    }

    fn on_release(&self, _next: &Arc<dyn LowLevelLogger>) {}
}

/// Keeps every message until a real dispatcher exists.
///
/// Messages live in the logger's own slab allocator. Fatal records are also
/// echoed to stderr right away since the process is about to abort.
pub struct AccumulatingLogger {
    allocator: Arc<SlabAllocator>,
    history: Mutex<Vec<MessageRef>>,
}

impl AccumulatingLogger {
    pub fn new() -> Self {
        Self {
            allocator: Arc::new(SlabAllocator::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Messages waiting for replay.
    pub fn len(&self) -> usize {
        self.history.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AccumulatingLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl LowLevelLogger for AccumulatingLogger {
    fn kind(&self) -> LoggerKind {
        LoggerKind::Accumulating
    }

    fn log(&self, record: Record<'_>) {
        let message = allocate(&self.allocator, record);
        self.dispatch(message);
    }

    fn dispatch(&self, message: MessageRef) {
        if message.level() == Level::Fatal {
            echo_message(&message);
        }
        self.history.lock().push(message);
    }

    fn flush(&self, _synchronous: bool) {}

    fn on_release(&self, next: &Arc<dyn LowLevelLogger>) {
        let history = mem::take(&mut *self.history.lock());
        tracing::debug!(count = history.len(), kind = ?next.kind(), "replaying startup log history");
        next.replay(history);
    }
}

/// The running dispatcher.
///
/// Builds messages in a shared slab allocator and either writes them on the
/// calling thread or hands them to a worker pool. Error, Fatal and immediate
/// categories always write on the calling thread.
pub struct BackgroundLogger {
    allocator: Arc<SlabAllocator>,
    user: Arc<UserLogger>,
    pool: TaskPool,
    asynchronous: bool,
    flush_retries: u32,
    flush_retry_interval: Duration,
}

impl BackgroundLogger {
    pub fn new(config: &LoggerConfig, user: Arc<UserLogger>) -> Self {
        Self {
            allocator: Arc::new(SlabAllocator::with_slab_size(config.slab_size)),
            user,
            pool: TaskPool::new(config.worker_threads, "log-worker"),
            asynchronous: config.asynchronous,
            flush_retries: config.flush_retries,
            flush_retry_interval: config.flush_retry_interval,
        }
    }

    pub fn allocator(&self) -> &Arc<SlabAllocator> {
        &self.allocator
    }

    pub fn is_asynchronous(&self) -> bool {
        self.asynchronous
    }

    /// Background tasks queued or running.
    pub fn pending(&self) -> usize {
        self.pool.pending()
    }

    fn treat_in_background(&self, message: &Message) -> bool {
        self.asynchronous && !message.category().is_immediate() && !message.level().is_critical()
    }

    fn wait_for_pool(&self) -> bool {
        for attempt in 1..=self.flush_retries {
            if self.pool.wait_idle(self.flush_retry_interval) {
                return true;
            }
            tracing::warn!(
                attempt,
                pending = self.pool.pending(),
                "log flush still waiting on background tasks"
            );
        }
        self.pool.pending() == 0
    }

    fn send(&self, message: MessageRef) {
        if !self.treat_in_background(&message) {
            self.user.log_message(&message);
            message.release();
            return;
        }

        let task_ref = message.acquire();
        let user = Arc::clone(&self.user);
        let job = Box::new(move || {
            user.log_message(&task_ref);
            task_ref.release();
        });
        if let Err(job) = self.pool.spawn(Priority::Normal, job) {
            // Pool already shut down.
            drop(job);
            self.user.log_message(&message);
        }
        message.release();
    }

    /// Waits out the retry budget, then flushes the sinks synchronously.
    /// False when background tasks are still running; the sinks are left
    /// alone then since a stuck task holds them.
    fn drain(&self) -> bool {
        if !self.wait_for_pool() {
            tracing::warn!(
                pending = self.pool.pending(),
                "log flush gave up waiting on background tasks"
            );
            return false;
        }
        self.user.flush(true);
        true
    }
}

impl LowLevelLogger for BackgroundLogger {
    fn kind(&self) -> LoggerKind {
        LoggerKind::Background
    }

    fn log(&self, record: Record<'_>) {
        // A sink logging from its own write path: drop it before paying for
        // an allocation.
        if self.user.is_reentrant() {
            return;
        }
        let message = allocate(&self.allocator, record);
        self.send(message);
    }

    fn dispatch(&self, message: MessageRef) {
        if self.user.is_reentrant() {
            return;
        }
        self.send(message);
    }

    /// Writes the history on the calling thread so that it keeps its order
    /// whatever the pool size.
    fn replay(&self, history: Vec<MessageRef>) {
        if self.user.is_reentrant() {
            return;
        }
        for message in history {
            self.user.log_message(&message);
        }
    }

    fn flush(&self, synchronous: bool) {
        if !self.user.is_reentrant() && (synchronous || !self.asynchronous) {
            self.drain();
            return;
        }

        let user = Arc::clone(&self.user);
        let allocator = Arc::clone(&self.allocator);
        let job = Box::new(move || {
            user.flush(false);
            let released = allocator.trim_cache();
            if released > 0 {
                tracing::trace!(released, "trimmed log slab cache");
            }
        });
        if let Err(job) = self.pool.spawn(Priority::Low, job) {
            job();
        }
    }

    fn on_release(&self, next: &Arc<dyn LowLevelLogger>) {
        tracing::debug!(kind = ?next.kind(), "releasing background log dispatcher");
        if !self.drain() {
            // A stuck job keeps its message and the allocator alive until it
            // returns; the worker exits by itself afterwards.
            let detached = self.pool.detach();
            tracing::warn!(detached, "left stalled log workers running");
            return;
        }
        self.pool.shutdown();
        let released = self.allocator.clear_release_memory();
        tracing::debug!(released, "log slab memory released");
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct DevNullLogger;

impl DevNullLogger {
    pub fn new() -> Self {
        Self
    }
}

impl LowLevelLogger for DevNullLogger {
    fn kind(&self) -> LoggerKind {
        LoggerKind::DevNull
    }

    fn log(&self, _record: Record<'_>) {}

    fn dispatch(&self, _message: MessageRef) {}

    fn flush(&self, _synchronous: bool) {}

    fn on_release(&self, _next: &Arc<dyn LowLevelLogger>) {}
}
