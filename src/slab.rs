//! Bucketed slab allocator backing log messages.
//!
//! The allocator is a ring of [`BUCKET_COUNT`] independent linear heaps. A
//! producer takes the next bucket in round-robin order and rolls forward past
//! busy ones, so concurrent producers mostly land on different buckets instead
//! of queueing behind a single lock. Blocks are always freed into the bucket
//! they came from.

use std::alloc::{self, Layout};
use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::bitmask::{AtomicBitMask, Backoff};
use crate::sparse_array::{SparseArray, SparseId};

/// Number of buckets in the ring. Must stay a power of two.
pub const BUCKET_COUNT: usize = 8;
/// Size of one slab, the increment by which a bucket heap grows.
pub const DEFAULT_SLAB_SIZE: usize = 16 * 1024;
/// Alignment of every block handed out.
pub const BLOCK_ALIGN: usize = 16;

const _: () = assert!(BUCKET_COUNT.is_power_of_two() && BUCKET_COUNT <= 64);

#[inline]
const fn round_up(size: usize) -> usize {
    (size + BLOCK_ALIGN - 1) & !(BLOCK_ALIGN - 1)
}

struct Page {
    ptr: NonNull<u8>,
    size: usize,
    cursor: usize,
    live: usize,
    dedicated: bool,
}

// SAFETY: a page owns its memory; it is only touched while the owning bucket
// is held.
unsafe impl Send for Page {}

impl Page {
    fn new(size: usize, dedicated: bool) -> Self {
        let Ok(layout) = Layout::from_size_align(size, BLOCK_ALIGN) else {
            panic!("slab page of {size} bytes exceeds the address space");
        };
        // SAFETY: size is non-zero, every caller passes a rounded, positive size.
        let raw = unsafe { alloc::alloc(layout) };
        let ptr = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        Self {
            ptr,
            size,
            cursor: 0,
            live: 0,
            dedicated,
        }
    }

    #[inline]
    fn contains(&self, ptr: NonNull<u8>, size: usize) -> bool {
        let base = self.ptr.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        addr >= base && addr + size <= base + self.size
    }
}

impl Drop for Page {
    fn drop(&mut self) {
        // SAFETY: `Page::new` validated this layout and allocated with it.
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.size, BLOCK_ALIGN);
            alloc::dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

/// Append-mostly heap of one bucket.
///
/// Blocks are bump-allocated from the current page. Every page counts its
/// live blocks; once that drops to zero the page is rewound (current page) or
/// parked in a cache until the next trim. Requests larger than a slab get a
/// page of their own, released as soon as the block is freed.
struct LinearHeap {
    pages: SparseArray<Page>,
    current: Option<SparseId>,
    cached: Vec<Page>,
    slab_size: usize,
    reserved: usize,
}

impl LinearHeap {
    fn new(slab_size: usize) -> Self {
        Self {
            pages: SparseArray::new(),
            current: None,
            cached: Vec::new(),
            slab_size,
            reserved: 0,
        }
    }

    fn allocate(&mut self, size: usize) -> (SparseId, NonNull<u8>, usize) {
        let size = round_up(size.max(1));

        if size > self.slab_size {
            let mut page = Page::new(size, true);
            page.cursor = size;
            page.live = 1;
            let ptr = page.ptr;
            self.reserved += size;
            return (self.pages.emplace(page), ptr, size);
        }

        if let Some(id) = self.current {
            let page = &mut self.pages[id];
            if page.size - page.cursor >= size {
                // SAFETY: cursor + size <= page.size.
                let ptr = unsafe { NonNull::new_unchecked(page.ptr.as_ptr().add(page.cursor)) };
                page.cursor += size;
                page.live += 1;
                return (id, ptr, size);
            }
        }

        let mut page = match self.cached.pop() {
            Some(page) => page,
            None => {
                self.reserved += self.slab_size;
                Page::new(self.slab_size, false)
            }
        };
        page.cursor = size;
        page.live = 1;
        let ptr = page.ptr;
        let id = self.pages.emplace(page);
        self.current = Some(id);
        (id, ptr, size)
    }

    fn deallocate(&mut self, page_id: SparseId, ptr: NonNull<u8>, size: usize) {
        let is_current = self.current == Some(page_id);
        let page = match self.pages.find_mut(page_id) {
            Some(page) => page,
            None => panic!("deallocating into unknown slab page {page_id}"),
        };
        assert!(page.contains(ptr, size), "block does not belong to slab page {page_id}");
        assert!(page.live > 0, "double free in slab page {page_id}");

        page.live -= 1;
        if page.live > 0 {
            return;
        }
        if is_current {
            page.cursor = 0;
            return;
        }

        if let Some(mut page) = self.pages.remove(page_id) {
            if page.dedicated {
                self.reserved -= page.size;
            } else {
                page.cursor = 0;
                self.cached.push(page);
            }
        }
    }

    /// Releases cached pages and an empty current page.
    fn trim(&mut self) -> usize {
        let mut released: usize = self.cached.drain(..).map(|page| page.size).sum();
        if let Some(id) = self.current {
            if self.pages.find(id).is_some_and(|page| page.live == 0) {
                if let Some(page) = self.pages.remove(id) {
                    released += page.size;
                }
                self.current = None;
            }
        }
        self.reserved -= released;
        released
    }

    fn release_all(&mut self) -> usize {
        let released = self.reserved;
        self.pages.clear_release_memory();
        self.cached = Vec::new();
        self.current = None;
        self.reserved = 0;
        released
    }

    fn live_blocks(&self) -> usize {
        self.pages.iter().map(|(_, page)| page.live).sum()
    }
}

struct Bucket {
    heap: UnsafeCell<LinearHeap>,
    in_use: AtomicBool,
}

/// A block handed out by a [`SlabAllocator`].
///
/// The block remembers its bucket and page so that freeing it goes straight
/// back to the heap it came from.
#[derive(Debug, Clone, Copy)]
pub struct SlabBlock {
    bucket: u8,
    page: SparseId,
    ptr: NonNull<u8>,
    size: usize,
}

// SAFETY: the block is a plain address; ownership rules are enforced by the
// allocator and the message reference count.
unsafe impl Send for SlabBlock {}
unsafe impl Sync for SlabBlock {}

impl SlabBlock {
    #[inline]
    pub fn bucket(&self) -> usize {
        self.bucket as usize
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Usable size, rounded up to [`BLOCK_ALIGN`].
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Counters describing a [`SlabAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlabStats {
    pub live_blocks: usize,
    pub allocations: u64,
    pub deallocations: u64,
    pub reserved_bytes: usize,
}

/// Ring of independently lockable linear heaps.
///
/// # Examples
///
/// ```
/// # use slab_logger::slab::SlabAllocator;
/// let allocator = SlabAllocator::new();
/// let block = allocator.acquire_bucket().allocate(100);
/// assert_eq!(allocator.stats().live_blocks, 1);
///
/// // SAFETY: the block came from this allocator and is not used afterwards.
/// unsafe { allocator.deallocate(block) };
/// assert_eq!(allocator.stats().live_blocks, 0);
/// ```
pub struct SlabAllocator {
    buckets: Box<[Bucket]>,
    busy: AtomicBitMask,
    revision: AtomicUsize,
    live_blocks: AtomicUsize,
    allocations: AtomicU64,
    deallocations: AtomicU64,
    reserved_bytes: AtomicUsize,
    slab_size: usize,
}

// SAFETY: every heap is behind its bucket's busy bit; a heap is only reached
// through a `BucketScope`, which exists at most once per bucket.
unsafe impl Send for SlabAllocator {}
unsafe impl Sync for SlabAllocator {}

impl SlabAllocator {
    pub fn new() -> Self {
        Self::with_slab_size(DEFAULT_SLAB_SIZE)
    }

    pub fn with_slab_size(slab_size: usize) -> Self {
        let slab_size = round_up(slab_size.max(BLOCK_ALIGN));
        let buckets = (0..BUCKET_COUNT)
            .map(|_| Bucket {
                heap: UnsafeCell::new(LinearHeap::new(slab_size)),
                in_use: AtomicBool::new(false),
            })
            .collect();
        Self {
            buckets,
            busy: AtomicBitMask::new(),
            revision: AtomicUsize::new(0),
            live_blocks: AtomicUsize::new(0),
            allocations: AtomicU64::new(0),
            deallocations: AtomicU64::new(0),
            reserved_bytes: AtomicUsize::new(0),
            slab_size,
        }
    }

    #[inline]
    pub fn slab_size(&self) -> usize {
        self.slab_size
    }

    /// Takes exclusive ownership of the next free bucket.
    ///
    /// Starts from a rotating revision counter and rolls forward past busy
    /// buckets; only when the whole ring is busy does it back off and retry.
    pub fn acquire_bucket(&self) -> BucketScope<'_> {
        let start = self.revision.fetch_add(1, Ordering::Relaxed);
        let mut backoff = Backoff::new();
        loop {
            for step in 0..BUCKET_COUNT {
                let index = (start + step) & (BUCKET_COUNT - 1);
                if let Some(scope) = self.try_lock_bucket(index) {
                    return scope;
                }
            }
            backoff.snooze();
        }
    }

    /// Waits until bucket `index` is free and takes it.
    pub fn lock_bucket(&self, index: usize) -> BucketScope<'_> {
        let mut backoff = Backoff::new();
        loop {
            if let Some(scope) = self.try_lock_bucket(index) {
                return scope;
            }
            backoff.snooze();
        }
    }

    pub fn try_lock_bucket(&self, index: usize) -> Option<BucketScope<'_>> {
        assert!(index < BUCKET_COUNT, "bucket index {index} out of range");
        if !self.busy.try_set(index) {
            return None;
        }
        let was_in_use = self.buckets[index].in_use.swap(true, Ordering::Acquire);
        assert!(!was_in_use, "bucket {index} entered while already in use");
        Some(BucketScope {
            allocator: self,
            index,
        })
    }

    /// Frees `block` into the bucket it was allocated from.
    ///
    /// # Safety
    ///
    /// `block` must come from this allocator, must not have been freed before
    /// and must not be accessed afterwards.
    pub unsafe fn deallocate(&self, block: SlabBlock) {
        let mut scope = self.lock_bucket(block.bucket());
        scope.deallocate(block);
    }

    /// Releases cached memory of every bucket that is free right now.
    ///
    /// Busy buckets are skipped, so the pass never blocks. Returns the number
    /// of bytes handed back to the system.
    pub fn trim_cache(&self) -> usize {
        let mut released = 0;
        for index in 0..BUCKET_COUNT {
            if let Some(mut scope) = self.try_lock_bucket(index) {
                released += scope.with_heap(LinearHeap::trim);
            }
        }
        released
    }

    /// Takes the whole ring and frees all memory.
    ///
    /// Panics if any block is still live.
    pub fn clear_release_memory(&self) -> usize {
        let mut scopes: Vec<BucketScope<'_>> =
            (0..BUCKET_COUNT).map(|index| self.lock_bucket(index)).collect();

        let live: usize = scopes.iter_mut().map(|scope| scope.heap().live_blocks()).sum();
        assert_eq!(live, 0, "slab allocator released with {live} live blocks");

        scopes
            .iter_mut()
            .map(|scope| scope.with_heap(LinearHeap::release_all))
            .sum()
    }

    pub fn stats(&self) -> SlabStats {
        SlabStats {
            live_blocks: self.live_blocks.load(Ordering::Acquire),
            allocations: self.allocations.load(Ordering::Relaxed),
            deallocations: self.deallocations.load(Ordering::Relaxed),
            reserved_bytes: self.reserved_bytes.load(Ordering::Relaxed),
        }
    }

    /// Bitmask of the buckets held right now.
    pub fn busy_buckets(&self) -> u64 {
        self.busy.bits()
    }
}

impl Default for SlabAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SlabAllocator {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        debug_assert_eq!(
            self.live_blocks.load(Ordering::Acquire),
            0,
            "slab allocator dropped with live blocks"
        );
    }
}

/// Exclusive hold on one bucket of a [`SlabAllocator`].
///
/// Releases the bucket when dropped.
pub struct BucketScope<'a> {
    allocator: &'a SlabAllocator,
    index: usize,
}

impl BucketScope<'_> {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    fn heap(&mut self) -> &mut LinearHeap {
        // SAFETY: the busy bit for this bucket is held for the scope's lifetime.
        unsafe { &mut *self.allocator.buckets[self.index].heap.get() }
    }

    fn with_heap<R>(&mut self, f: impl FnOnce(&mut LinearHeap) -> R) -> R {
        let allocator = self.allocator;
        let heap = self.heap();
        let before = heap.reserved;
        let result = f(heap);
        let after = heap.reserved;
        if after > before {
            allocator.reserved_bytes.fetch_add(after - before, Ordering::Relaxed);
        } else if before > after {
            allocator.reserved_bytes.fetch_sub(before - after, Ordering::Relaxed);
        }
        result
    }

    /// Bump-allocates `size` bytes, aligned to [`BLOCK_ALIGN`].
    pub fn allocate(&mut self, size: usize) -> SlabBlock {
        let bucket = self.index as u8;
        let (page, ptr, size) = self.with_heap(|heap| heap.allocate(size));
        self.allocator.live_blocks.fetch_add(1, Ordering::AcqRel);
        self.allocator.allocations.fetch_add(1, Ordering::Relaxed);
        SlabBlock {
            bucket,
            page,
            ptr,
            size,
        }
    }

    /// Returns `block` to this bucket.
    ///
    /// Panics when the block belongs to another bucket.
    ///
    /// # Safety
    ///
    /// `block` must come from this allocator, must not have been freed before
    /// and must not be accessed afterwards.
    pub unsafe fn deallocate(&mut self, block: SlabBlock) {
        assert_eq!(
            block.bucket(),
            self.index,
            "cross-bucket deallocation: block of bucket {} freed into bucket {}",
            block.bucket(),
            self.index
        );
        self.with_heap(|heap| heap.deallocate(block.page, block.ptr, block.size));
        self.allocator.live_blocks.fetch_sub(1, Ordering::AcqRel);
        self.allocator.deallocations.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for BucketScope<'_> {
    fn drop(&mut self) {
        let was_in_use = self.allocator.buckets[self.index].in_use.swap(false, Ordering::Release);
        debug_assert!(was_in_use);
        self.allocator.busy.clear(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_are_aligned_and_disjoint() {
        let allocator = SlabAllocator::new();
        let mut scope = allocator.acquire_bucket();
        let a = scope.allocate(3);
        let b = scope.allocate(40);
        assert_eq!(a.as_ptr() as usize % BLOCK_ALIGN, 0);
        assert_eq!(b.as_ptr() as usize % BLOCK_ALIGN, 0);
        assert_eq!(a.size(), 16);
        assert_eq!(b.as_ptr() as usize, a.as_ptr() as usize + 16);
        unsafe {
            scope.deallocate(a);
            scope.deallocate(b);
        }
    }

    #[test]
    fn test_empty_current_page_is_rewound() {
        let allocator = SlabAllocator::new();
        let mut scope = allocator.lock_bucket(0);
        let first = scope.allocate(64);
        unsafe { scope.deallocate(first) };
        let again = scope.allocate(64);
        assert_eq!(first.as_ptr(), again.as_ptr());
        unsafe { scope.deallocate(again) };
    }

    #[test]
    fn test_heap_grows_by_slabs() {
        let allocator = SlabAllocator::with_slab_size(256);
        let mut scope = allocator.lock_bucket(2);
        let blocks: Vec<_> = (0..5).map(|_| scope.allocate(100)).collect();
        drop(scope);
        // Two 112-byte blocks per 256-byte slab.
        assert_eq!(allocator.stats().reserved_bytes, 3 * 256);

        for block in blocks {
            unsafe { allocator.deallocate(block) };
        }
        assert_eq!(allocator.stats().live_blocks, 0);
        assert!(allocator.trim_cache() > 0);
        assert_eq!(allocator.stats().reserved_bytes, 0);
    }

    #[test]
    fn test_oversized_block_gets_dedicated_page() {
        let allocator = SlabAllocator::with_slab_size(256);
        let block = allocator.acquire_bucket().allocate(1000);
        assert_eq!(block.size(), 1008);
        assert_eq!(allocator.stats().reserved_bytes, 1008);
        unsafe { allocator.deallocate(block) };
        assert_eq!(allocator.stats().reserved_bytes, 0);
    }

    #[test]
    #[should_panic(expected = "cross-bucket deallocation")]
    fn test_cross_bucket_free_panics() {
        let allocator = SlabAllocator::new();
        let block = allocator.lock_bucket(1).allocate(32);
        let mut other = allocator.lock_bucket(2);
        unsafe { other.deallocate(block) };
    }

    #[test]
    fn test_trim_skips_busy_buckets() {
        let allocator = SlabAllocator::with_slab_size(128);
        let mut held = allocator.lock_bucket(0);
        let blocks: Vec<_> = (0..3).map(|_| held.allocate(100)).collect();
        for block in blocks {
            unsafe { held.deallocate(block) };
        }
        // Bucket 0 has cached pages but is held, so nothing is released.
        assert_eq!(allocator.trim_cache(), 0);
        drop(held);
        assert!(allocator.trim_cache() > 0);
    }

    #[test]
    #[should_panic(expected = "live blocks")]
    fn test_clear_with_live_block_panics() {
        let allocator = SlabAllocator::new();
        let _block = allocator.acquire_bucket().allocate(8);
        allocator.clear_release_memory();
    }

    #[test]
    fn test_round_robin_spreads_buckets() {
        let allocator = SlabAllocator::new();
        let mut seen = [false; BUCKET_COUNT];
        for _ in 0..BUCKET_COUNT {
            seen[allocator.acquire_bucket().index()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }
}
