use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;

use crate::message::Message;
use crate::sinks::Sink;
use crate::sparse_array::{SparseArray, SparseId};

/// Handle of a sink registered with a [`UserLogger`].
pub type SinkId = SparseId;

const THREAD_SHARDS: usize = 16;

struct SinkEntry {
    sink: Arc<dyn Sink>,
    auto_delete: bool,
}

/// Threads currently broadcasting through a [`UserLogger`].
///
/// Kept as an explicit object owned by the composite rather than a
/// thread-local, so the re-entrancy rule is visible where it is enforced.
/// Threads are spread over independently locked shards, and a count of
/// active broadcasts lets the check skip locking entirely when nobody is
/// broadcasting.
#[derive(Debug, Default)]
pub struct ThreadContext {
    active: AtomicUsize,
    shards: [Mutex<Vec<ThreadId>>; THREAD_SHARDS],
}

fn shard_of(thread: ThreadId) -> usize {
    let mut hasher = DefaultHasher::new();
    thread.hash(&mut hasher);
    (hasher.finish() as usize) % THREAD_SHARDS
}

impl ThreadContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the calling thread as broadcasting. `None` when it already is.
    pub fn enter(&self) -> Option<BroadcastGuard<'_>> {
        let thread = thread::current().id();
        let shard = shard_of(thread);
        let mut threads = self.shards[shard].lock();
        if threads.contains(&thread) {
            return None;
        }
        threads.push(thread);
        self.active.fetch_add(1, Ordering::AcqRel);
        Some(BroadcastGuard {
            context: self,
            thread,
            shard,
        })
    }

    /// True when the calling thread is inside a broadcast.
    pub fn is_active(&self) -> bool {
        // The calling thread's own mark is always visible to it.
        if self.active.load(Ordering::Acquire) == 0 {
            return false;
        }
        let thread = thread::current().id();
        self.shards[shard_of(thread)].lock().contains(&thread)
    }
}

/// Clears the calling thread's broadcast mark on drop.
pub struct BroadcastGuard<'a> {
    context: &'a ThreadContext,
    thread: ThreadId,
    shard: usize,
}

impl Drop for BroadcastGuard<'_> {
    fn drop(&mut self) {
        let mut threads = self.context.shards[self.shard].lock();
        if let Some(pos) = threads.iter().position(|t| *t == self.thread) {
            threads.swap_remove(pos);
            self.context.active.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Fan-out over the registered sinks.
///
/// The composite never builds messages, it only forwards finished ones. A
/// sink that logs from inside its own write path does not recurse: the
/// nested call is dropped.
#[derive(Default)]
pub struct UserLogger {
    sinks: Mutex<SparseArray<SinkEntry>>,
    threads: ThreadContext,
}

impl UserLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `sink`. With `auto_delete` the composite owns the sink and
    /// closes it when it is removed or the composite is cleared.
    pub fn add(&self, sink: Arc<dyn Sink>, auto_delete: bool) -> SinkId {
        self.sinks.lock().emplace(SinkEntry { sink, auto_delete })
    }

    /// Unregisters a sink, closing it first if it was auto-deleted.
    pub fn remove(&self, id: SinkId) -> Option<Arc<dyn Sink>> {
        let entry = self.sinks.lock().remove(id)?;
        if entry.auto_delete {
            entry.sink.close();
        }
        Some(entry.sink)
    }

    pub fn len(&self) -> usize {
        self.sinks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the calling thread is already inside a broadcast.
    pub fn is_reentrant(&self) -> bool {
        self.threads.is_active()
    }

    /// Hands `message` to every sink.
    pub fn log_message(&self, message: &Message) {
        let Some(_guard) = self.threads.enter() else {
            return;
        };
        let sinks = self.sinks.lock();
        for (_, entry) in sinks.iter() {
            entry.sink.log_message(message);
        }
    }

    pub fn flush(&self, synchronous: bool) {
        let Some(_guard) = self.threads.enter() else {
            return;
        };
        let sinks = self.sinks.lock();
        for (_, entry) in sinks.iter() {
            entry.sink.flush(synchronous);
        }
    }

    /// Drops every registration, closing the auto-deleted sinks.
    pub fn clear(&self) {
        let entries = Self::take_all(&mut self.sinks.lock());
        Self::close_all(entries);
    }

    /// Like [`clear`](Self::clear), but gives up when a broadcast holds the
    /// sinks for longer than `timeout`. False when nothing was cleared.
    pub fn clear_within(&self, timeout: Duration) -> bool {
        let Some(mut sinks) = self.sinks.try_lock_for(timeout) else {
            return false;
        };
        let entries = Self::take_all(&mut sinks);
        drop(sinks);
        Self::close_all(entries);
        true
    }

    fn take_all(sinks: &mut SparseArray<SinkEntry>) -> Vec<SinkEntry> {
        let ids: Vec<SinkId> = sinks.iter().map(|(id, _)| id).collect();
        ids.into_iter().filter_map(|id| sinks.remove(id)).collect()
    }

    fn close_all(entries: Vec<SinkEntry>) {
        for entry in entries {
            if entry.auto_delete {
                entry.sink.close();
            } else {
                entry.sink.flush(true);
            }
        }
    }
}

impl Drop for UserLogger {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::{Level, LOG_GENERAL};
    use crate::message::allocate_log;
    use crate::sinks::MemorySink;
    use crate::slab::SlabAllocator;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ClosingSink {
        closed: AtomicUsize,
    }

    impl Sink for ClosingSink {
        fn log_message(&self, _message: &Message) {}
        fn flush(&self, _synchronous: bool) {}
        fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// A sink that logs back into the composite from its write path.
    struct EchoSink {
        composite: Arc<UserLogger>,
        allocator: Arc<SlabAllocator>,
        calls: AtomicUsize,
    }

    impl Sink for EchoSink {
        fn log_message(&self, _message: &Message) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let echo = allocate_log(&self.allocator, &LOG_GENERAL, Level::Error, crate::site!(), "echo");
            self.composite.log_message(&echo);
            self.composite.flush(true);
        }
        fn flush(&self, _synchronous: bool) {}
    }

    #[test]
    fn test_fan_out_to_all_sinks() {
        let composite = UserLogger::new();
        let a = Arc::new(MemorySink::new());
        let b = Arc::new(MemorySink::new());
        composite.add(a.clone(), false);
        composite.add(b.clone(), true);

        let allocator = Arc::new(SlabAllocator::new());
        let msg = allocate_log(&allocator, &LOG_GENERAL, Level::Info, crate::site!(), "hi");
        composite.log_message(&msg);
        composite.flush(false);

        assert_eq!(a.texts(), vec!["hi"]);
        assert_eq!(b.texts(), vec!["hi"]);
        assert_eq!(a.flush_count(), 1);
    }

    #[test]
    fn test_remove_closes_only_auto_deleted() {
        let composite = UserLogger::new();
        let owned = Arc::new(ClosingSink { closed: AtomicUsize::new(0) });
        let borrowed = Arc::new(ClosingSink { closed: AtomicUsize::new(0) });
        let owned_id = composite.add(owned.clone(), true);
        let borrowed_id = composite.add(borrowed.clone(), false);

        assert!(composite.remove(owned_id).is_some());
        assert!(composite.remove(borrowed_id).is_some());
        assert!(composite.remove(owned_id).is_none());
        assert_eq!(owned.closed.load(Ordering::SeqCst), 1);
        assert_eq!(borrowed.closed.load(Ordering::SeqCst), 0);
        assert!(composite.is_empty());
    }

    #[test]
    fn test_reentrant_calls_are_dropped() {
        let composite = Arc::new(UserLogger::new());
        let allocator = Arc::new(SlabAllocator::new());
        let memory = Arc::new(MemorySink::new());
        let echo = Arc::new(EchoSink {
            composite: composite.clone(),
            allocator: allocator.clone(),
            calls: AtomicUsize::new(0),
        });
        composite.add(echo.clone(), false);
        composite.add(memory.clone(), false);

        let msg = allocate_log(&allocator, &LOG_GENERAL, Level::Info, crate::site!(), "outer");
        composite.log_message(&msg);

        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
        assert_eq!(memory.texts(), vec!["outer"]);
        assert!(!composite.is_reentrant());
        assert_eq!(memory.flush_count(), 0);

        // Break the composite -> echo -> composite cycle.
        composite.clear();
    }

    #[test]
    fn test_broadcast_marks_are_per_thread() {
        let context = Arc::new(ThreadContext::new());
        let outer = context.enter().unwrap_or_else(|| panic!("first entry refused"));
        assert!(context.is_active());
        assert!(context.enter().is_none());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let context = context.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        assert!(!context.is_active());
                        let guard = context.enter();
                        assert!(guard.is_some());
                        assert!(context.is_active());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        drop(outer);
        assert!(!context.is_active());
        assert_eq!(context.active.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_clear_within_gives_up_on_busy_sinks() {
        let composite = Arc::new(UserLogger::new());
        let memory = Arc::new(MemorySink::new());
        composite.add(memory.clone(), false);

        let held = composite.sinks.lock();
        let busy = composite.clone();
        let cleared = thread::spawn(move || busy.clear_within(Duration::from_millis(20)))
            .join()
            .unwrap();
        assert!(!cleared);
        drop(held);

        assert_eq!(composite.len(), 1);
        assert!(composite.clear_within(Duration::from_millis(20)));
        assert!(composite.is_empty());
        assert_eq!(memory.flush_count(), 1);
    }
}
