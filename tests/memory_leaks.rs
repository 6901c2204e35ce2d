//! Tests that allocate/deallocate cycles return allocators to their
//! starting statistics — no cell or byte count left dangling.

use slabkit::{Allocator, PoolAllocator, PoolCollection, PoolConfig, StatisticsProvider};

#[test]
fn test_pool_allocator_tracks_usage() {
    let allocator = PoolAllocator::with_config(128, 8, 16, PoolConfig::production()).unwrap();

    unsafe {
        let mut ptrs = Vec::new();
        for _ in 0..8 {
            ptrs.push(allocator.allocate_node(128, 8).unwrap());
        }

        let stats = allocator.stats();
        assert_eq!(stats.allocated_bytes, 8 * 128, "should track allocated bytes");
        assert_eq!(stats.allocation_count, 8);

        for ptr in ptrs {
            allocator.deallocate_node(ptr, 128, 8);
        }

        let stats = allocator.stats();
        assert_eq!(stats.allocated_bytes, 0, "allocated bytes should return to zero");
        assert_eq!(stats.deallocation_count, 8);
    }
}

#[test]
fn test_no_leaks_in_repeated_cycles() {
    let allocator = PoolAllocator::with_config(64, 8, 32, PoolConfig::production()).unwrap();

    unsafe {
        for _ in 0..100 {
            let ptr = allocator.allocate_node(64, 8).unwrap();
            allocator.deallocate_node(ptr, 64, 8);
        }
    }

    let stats = allocator.stats();
    assert_eq!(stats.allocated_bytes, 0, "no bytes should remain live");
    assert_eq!(stats.allocation_count, 100);
    assert_eq!(stats.deallocation_count, 100);
}

#[test]
fn test_pool_allocator_peak_tracks_high_water_mark() {
    let allocator = PoolAllocator::with_config(32, 8, 256, PoolConfig::production()).unwrap();

    unsafe {
        let mut ptrs = Vec::new();
        for _ in 0..256 {
            ptrs.push(allocator.allocate_node(32, 8).unwrap());
        }

        let peak = allocator.stats().peak_allocated_bytes;
        assert_eq!(peak, 256 * 32);

        for ptr in ptrs {
            allocator.deallocate_node(ptr, 32, 8);
        }

        // Peak remains the high-water mark even after everything is freed.
        assert_eq!(allocator.stats().peak_allocated_bytes, peak);
        assert_eq!(allocator.stats().allocated_bytes, 0);
    }
}

#[test]
fn test_pool_collection_tracks_usage_across_buckets() {
    let collection = PoolCollection::new(64, 1024, PoolConfig::production());

    unsafe {
        let a = collection.allocate_node(8, 1).unwrap();
        let b = collection.allocate_node(16, 1).unwrap();
        let c = collection.allocate_node(32, 1).unwrap();

        assert_eq!(collection.stats().allocation_count, 3);

        collection.deallocate_node(a, 8, 1);
        collection.deallocate_node(b, 16, 1);
        collection.deallocate_node(c, 32, 1);

        assert_eq!(collection.stats().allocated_bytes, 0);
        assert_eq!(collection.stats().deallocation_count, 3);
    }
}

#[test]
fn test_stats_disabled_by_default() {
    let allocator = PoolAllocator::with_config(64, 8, 16, PoolConfig::default()).unwrap();
    unsafe {
        let ptr = allocator.allocate_node(64, 8).unwrap();
        allocator.deallocate_node(ptr, 64, 8);
    }
    // PoolConfig::default() disables tracking; the snapshot stays at zero.
    assert_eq!(allocator.stats(), slabkit::AllocatorStats::default());
}
