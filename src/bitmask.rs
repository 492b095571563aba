use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

/// Lock-free set of up to 64 busy flags.
///
/// Each bit guards one independent resource. Setting a bit is an exclusive
/// acquire, clearing it releases the resource again.
#[derive(Debug, Default)]
pub struct AtomicBitMask {
    bits: AtomicU64,
}

impl AtomicBitMask {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU64::new(0),
        }
    }

    /// Sets `bit` if it was clear. Returns false when somebody else holds it.
    #[inline]
    pub fn try_set(&self, bit: usize) -> bool {
        debug_assert!(bit < 64);
        let mask = 1u64 << bit;
        self.bits.fetch_or(mask, Ordering::Acquire) & mask == 0
    }

    #[inline]
    pub fn clear(&self, bit: usize) {
        debug_assert!(bit < 64);
        let mask = 1u64 << bit;
        let previous = self.bits.fetch_and(!mask, Ordering::Release);
        assert!(previous & mask != 0, "cleared bit {bit} that was not set");
    }

    #[inline]
    pub fn is_set(&self, bit: usize) -> bool {
        self.bits.load(Ordering::Acquire) & (1u64 << bit) != 0
    }

    #[inline]
    pub fn bits(&self) -> u64 {
        self.bits.load(Ordering::Acquire)
    }
}

const SPIN_LIMIT: u32 = 6;
const YIELD_LIMIT: u32 = 10;
const MAX_SLEEP: Duration = Duration::from_micros(500);

/// Bounded exponential backoff for the spin-waits around the bucket ring.
///
/// Spins with a doubling count first, then yields the time slice, and once
/// that is exhausted sleeps for a short, capped interval.
#[derive(Debug, Default)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    pub const fn new() -> Self {
        Self { step: 0 }
    }

    pub fn snooze(&mut self) {
        if self.step <= SPIN_LIMIT {
            for _ in 0..(1u32 << self.step) {
                std::hint::spin_loop();
            }
        } else if self.step <= YIELD_LIMIT {
            thread::yield_now();
        } else {
            let exponent = (self.step - YIELD_LIMIT).min(9);
            let sleep = Duration::from_micros(1u64 << exponent).min(MAX_SLEEP);
            thread::sleep(sleep);
        }
        self.step = self.step.saturating_add(1);
    }
}
