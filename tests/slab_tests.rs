use slab_logger::message::{allocate_log_copy, allocate_log_fmt};
use slab_logger::slab::{SlabAllocator, BUCKET_COUNT};
use slab_logger::{Level, MessageRef, LOG_GENERAL};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_bucket_exclusivity_under_stress() {
    let allocator = Arc::new(SlabAllocator::with_slab_size(1024));
    let holders: Arc<Vec<AtomicUsize>> = Arc::new((0..BUCKET_COUNT).map(|_| AtomicUsize::new(0)).collect());
    let barrier = Arc::new(Barrier::new(16));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let allocator = allocator.clone();
            let holders = holders.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for i in 0..2000 {
                    let mut scope = allocator.acquire_bucket();
                    let bucket = scope.index();
                    let inside = holders[bucket].fetch_add(1, Ordering::SeqCst);
                    assert_eq!(inside, 0, "Two threads inside bucket {bucket}");

                    let block = scope.allocate(16 + i % 200);
                    // SAFETY: freshly allocated, at least one byte long.
                    unsafe { block.as_ptr().write(0xAB) };
                    unsafe { scope.deallocate(block) };

                    holders[bucket].fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = allocator.stats();
    assert_eq!(stats.live_blocks, 0);
    assert_eq!(stats.allocations, 32_000);
    assert_eq!(stats.deallocations, 32_000);
    assert_eq!(allocator.busy_buckets(), 0);
}

#[test]
fn test_messages_released_on_other_threads() {
    let allocator = Arc::new(SlabAllocator::new());
    let (tx, rx) = flume::unbounded::<MessageRef>();

    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let rx = rx.clone();
            thread::spawn(move || {
                let mut seen = 0;
                while let Ok(message) = rx.recv() {
                    assert!(message.text().starts_with("msg "));
                    message.release();
                    seen += 1;
                }
                seen
            })
        })
        .collect();
    drop(rx);

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let allocator = allocator.clone();
            let tx = tx.clone();
            thread::spawn(move || {
                for i in 0..500 {
                    let message = allocate_log_fmt(
                        &allocator,
                        &LOG_GENERAL,
                        Level::Info,
                        slab_logger::site!(),
                        format_args!("msg {p}/{i}"),
                    );
                    tx.send(message).unwrap();
                }
            })
        })
        .collect();
    drop(tx);
    for producer in producers {
        producer.join().unwrap();
    }
    let total: usize = consumers.into_iter().map(|c| c.join().unwrap()).sum();

    assert_eq!(total, 2000);
    assert_eq!(allocator.stats().live_blocks, 0);
    assert!(allocator.clear_release_memory() > 0);
    assert_eq!(allocator.stats().reserved_bytes, 0);
}

#[test]
fn test_shared_message_freed_by_last_holder() {
    let allocator = Arc::new(SlabAllocator::new());
    let message = allocate_log_copy(&allocator, &LOG_GENERAL, Level::Warning, slab_logger::site!(), "shared");
    let barrier = Arc::new(Barrier::new(8));
    let last = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let reference = message.acquire();
            let barrier = barrier.clone();
            let last = last.clone();
            thread::spawn(move || {
                barrier.wait();
                assert_eq!(reference.text(), "shared");
                if reference.release() {
                    last.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    let producer_was_last = message.release();
    for handle in handles {
        handle.join().unwrap();
    }

    let freed = last.load(Ordering::SeqCst) + usize::from(producer_was_last);
    assert_eq!(freed, 1, "Exactly one release frees the block");
    assert_eq!(allocator.stats().live_blocks, 0);
}

#[test]
fn test_trim_after_burst_returns_cache() {
    let allocator = SlabAllocator::with_slab_size(256);
    let mut blocks = Vec::new();
    {
        let mut scope = allocator.lock_bucket(3);
        for _ in 0..40 {
            blocks.push(scope.allocate(48));
        }
    }
    let reserved = allocator.stats().reserved_bytes;
    assert!(reserved > 256);

    {
        let mut scope = allocator.lock_bucket(3);
        for block in blocks.drain(..) {
            // SAFETY: every block came from bucket 3 and is freed once.
            unsafe { scope.deallocate(block) };
        }
    }
    let released = allocator.trim_cache();
    assert!(released > 0);
    assert!(allocator.stats().reserved_bytes < reserved);
}
