//! Multi-size pool allocator (spec component H): a size-bucketed free-list
//! array sharing one block list, each bucket populated lazily from its own
//! freshly-inserted slabs.

use core::cell::RefCell;
use core::ptr::NonNull;

use crate::block_list::BlockList;
use crate::error::{AllocError, AllocResult, AllocatorInfo};
use crate::free_list_array::{FreeListArray, Log2Policy};
use crate::pool::config::PoolConfig;
use crate::stats::{AllocatorStats, OptionalStats, StatisticsProvider};
use crate::traits::{Allocator, AllocatorCapabilities};

pub struct PoolCollection {
    array: FreeListArray<Log2Policy>,
    blocks: RefCell<BlockList>,
    config: PoolConfig,
    stats: OptionalStats,
    info: AllocatorInfo,
}

impl PoolCollection {
    pub fn new(max_node_size: usize, initial_block_size: usize, config: PoolConfig) -> Self {
        let info = AllocatorInfo::new("PoolCollection", max_node_size);
        Self {
            array: FreeListArray::new(max_node_size, info),
            blocks: RefCell::new(BlockList::new(initial_block_size, info)),
            config,
            stats: OptionalStats::new(config.track_stats),
            info,
        }
    }

    fn fill(ptr: NonNull<u8>, size: usize, pattern: Option<u8>) {
        if let Some(byte) = pattern {
            unsafe { core::ptr::write_bytes(ptr.as_ptr(), byte, size) };
        }
    }

    /// Inserts a freshly-allocated slab into the one bucket serving `size`.
    fn refill_bucket(&self, size: usize) -> AllocResult<()> {
        let block = self.blocks.borrow_mut().allocate()?;
        unsafe { self.array.insert(size, block.memory, block.size)? };
        Ok(())
    }

    /// Ensures the bucket serving `node_size` holds at least `capacity`
    /// free cells, inserting fresh slabs as needed.
    pub fn reserve(&self, node_size: usize, capacity: usize) -> AllocResult<()> {
        while self.array.list_for_size(node_size)?.capacity() < capacity {
            self.refill_bucket(node_size)?;
        }
        Ok(())
    }

    pub fn max_node_size(&self) -> usize {
        self.array.list(self.array.max_index()).node_size()
    }
}

unsafe impl Allocator for PoolCollection {
    unsafe fn allocate_node(&self, size: usize, _alignment: usize) -> AllocResult<NonNull<u8>> {
        if let Some(cell) = self.array.allocate(size)? {
            Self::fill(cell, size, self.config.alloc_pattern);
            self.stats.record_alloc(size);
            return Ok(cell);
        }
        self.refill_bucket(size)?;
        let cell = self.array.allocate(size)?.ok_or_else(|| {
            self.stats.record_failure();
            AllocError::out_of_memory(
                self.info,
                core::alloc::Layout::from_size_align(size, 1).unwrap_or_else(|_| core::alloc::Layout::new::<u8>()),
            )
        })?;
        Self::fill(cell, size, self.config.alloc_pattern);
        self.stats.record_alloc(size);
        Ok(cell)
    }

    /// Routes by `size`. Passing a different size than was used on
    /// allocation places the cell in the wrong bucket — a precondition
    /// violation this layer only verifies under `debug_assertions`.
    unsafe fn deallocate_node(&self, ptr: NonNull<u8>, size: usize, _alignment: usize) {
        Self::fill(ptr, size, self.config.dealloc_pattern);
        match unsafe { self.array.deallocate(size, ptr) } {
            Ok(()) => self.stats.record_dealloc(size),
            Err(_) => debug_assert!(false, "deallocate_node: size does not map to a valid bucket"),
        }
    }

    fn max_node_size(&self) -> usize {
        self.max_node_size()
    }
}

impl AllocatorCapabilities for PoolCollection {
    const STATEFUL: bool = true;
    const ARRAY_AWARE: bool = false;
}

impl StatisticsProvider for PoolCollection {
    fn stats(&self) -> AllocatorStats {
        self.stats.snapshot()
    }
}
