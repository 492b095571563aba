//! Call-site metadata captured when a message is logged.
//!
//! Timing comes from two clocks: a monotonic one measuring the time since the
//! process started logging (used by the text sink header) and the wall clock
//! (used by the JSON sink).

use std::cell::Cell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;

lazy_static! {
    /// Reference point for [`SiteInfo::elapsed`].
    static ref PROCESS_START: Instant = Instant::now();
}

thread_local! {
    static THREAD_HASH: Cell<Option<u16>> = const { Cell::new(None) };
}

/// Time since the logging clock started.
#[inline]
pub fn elapsed() -> Duration {
    PROCESS_START.elapsed()
}

/// Starts the logging clock if it is not running yet.
pub fn start_clock() {
    lazy_static::initialize(&PROCESS_START);
}

/// Short, stable hash of the calling thread's id.
pub fn current_thread_hash() -> u16 {
    THREAD_HASH.with(|cached| {
        if let Some(hash) = cached.get() {
            return hash;
        }
        let hash = thread_hash(thread::current().id());
        cached.set(Some(hash));
        hash
    })
}

/// Folds a thread id into 16 bits.
pub fn thread_hash(id: ThreadId) -> u16 {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    let h = hasher.finish();
    (h ^ (h >> 16) ^ (h >> 32) ^ (h >> 48)) as u16
}

/// Where and when a message was produced.
#[derive(Debug, Clone, Copy)]
pub struct SiteInfo {
    pub timestamp: DateTime<Utc>,
    pub elapsed: Duration,
    pub thread_id: ThreadId,
    pub thread_hash: u16,
    pub file: &'static str,
    pub line: u32,
}

impl SiteInfo {
    /// Captures the clocks and the calling thread for `file:line`.
    pub fn new(file: &'static str, line: u32) -> Self {
        Self {
            timestamp: Utc::now(),
            elapsed: elapsed(),
            thread_id: thread::current().id(),
            thread_hash: current_thread_hash(),
            file,
            line,
        }
    }

    /// Seconds since the logging clock started.
    #[inline]
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// Captures a [`SiteInfo`] for the current source location.
#[macro_export]
macro_rules! site {
    () => {
        $crate::SiteInfo::new(file!(), line!())
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_is_monotonic() {
        start_clock();
        let mut prev = elapsed();
        for _ in 0..1000 {
            let current = elapsed();
            assert!(current >= prev, "elapsed time should never go backwards");
            prev = current;
        }
    }

    #[test]
    fn test_thread_hash_is_cached_and_stable() {
        let first = current_thread_hash();
        assert_eq!(first, current_thread_hash());
        assert_eq!(first, thread_hash(thread::current().id()));
    }

    #[test]
    fn test_site_captures_location() {
        let site = crate::site!();
        assert!(site.file.ends_with("site.rs"));
        assert!(site.line > 0);
        assert_eq!(site.thread_id, thread::current().id());
    }

    #[test]
    fn test_sites_order_by_elapsed() {
        let a = SiteInfo::new(file!(), line!());
        thread::sleep(Duration::from_millis(1));
        let b = SiteInfo::new(file!(), line!());
        assert!(b.elapsed > a.elapsed);
        assert!(b.timestamp >= a.timestamp);
    }
}
