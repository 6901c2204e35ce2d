//! The pool allocator (spec component G): one free list plus one block
//! list, serving a single fixed node size.

use core::cell::RefCell;
use core::ptr::NonNull;

use crate::align::is_aligned;
use crate::block_list::BlockList;
use crate::error::{AllocError, AllocErrorKind, AllocResult, AllocatorInfo};
use crate::free_list::FreeList;
use crate::small_free_list::SmallFreeList;
use crate::pool::config::PoolConfig;
use crate::stats::{AllocatorStats, OptionalStats, StatisticsProvider};
use crate::traits::{Allocator, AllocatorCapabilities};

enum FreeListStorage {
    Pointer(FreeList),
    Small(RefCell<SmallFreeList>),
}

/// A pool allocator over one fixed node size, backed by either the
/// pointer-chained free list (array allocation supported) or the
/// byte-offset small free list (no arrays, nodes down to one byte).
pub struct PoolAllocator {
    node_size: usize,
    alignment: usize,
    blocks: RefCell<BlockList>,
    free: FreeListStorage,
    config: PoolConfig,
    stats: OptionalStats,
    info: AllocatorInfo,
}

impl PoolAllocator {
    /// Pointer-chained variant; supports `allocate_array`.
    pub fn with_config(
        node_size: usize, alignment: usize, capacity_hint: usize, config: PoolConfig,
    ) -> AllocResult<Self> {
        let info = AllocatorInfo::new("PoolAllocator", node_size);
        let free = FreeList::new(node_size.max(alignment));
        let initial_block = (capacity_hint.max(1) * free.node_size()).max(free.node_size());
        Ok(Self {
            node_size: free.node_size(),
            alignment,
            blocks: RefCell::new(BlockList::new(initial_block, info)),
            free: FreeListStorage::Pointer(free),
            config,
            stats: OptionalStats::new(config.track_stats),
            info,
        })
    }

    /// Small-node variant (`node_size` in `1..=255`); no array support.
    pub fn with_small_node_config(
        node_size: u8, capacity_hint: usize, config: PoolConfig,
    ) -> AllocResult<Self> {
        let info = AllocatorInfo::new("PoolAllocator(small)", node_size as usize);
        let small = SmallFreeList::new(node_size);
        let initial_block = (capacity_hint.max(1) * node_size as usize).max(node_size as usize);
        Ok(Self {
            node_size: node_size as usize,
            alignment: 1,
            blocks: RefCell::new(BlockList::new(initial_block, info)),
            free: FreeListStorage::Small(RefCell::new(small)),
            config,
            stats: OptionalStats::new(config.track_stats),
            info,
        })
    }

    fn fill(ptr: NonNull<u8>, size: usize, pattern: Option<u8>) {
        if let Some(byte) = pattern {
            unsafe { core::ptr::write_bytes(ptr.as_ptr(), byte, size) };
        }
    }

    fn refill_from_block(&self) -> AllocResult<()> {
        let block = self.blocks.borrow_mut().allocate()?;
        match &self.free {
            FreeListStorage::Pointer(list) => {
                unsafe { list.insert(block.memory, block.size) };
            }
            FreeListStorage::Small(list) => {
                unsafe { list.borrow_mut().insert(block.memory, block.size) };
            }
        }
        Ok(())
    }

    fn pop_cell(&self) -> Option<NonNull<u8>> {
        match &self.free {
            FreeListStorage::Pointer(list) => list.allocate(),
            FreeListStorage::Small(list) => list.borrow_mut().allocate(),
        }
    }

    fn push_cell(&self, cell: NonNull<u8>) {
        match &self.free {
            FreeListStorage::Pointer(list) => unsafe { list.deallocate(cell) },
            FreeListStorage::Small(list) => unsafe { list.borrow_mut().deallocate(cell) },
        }
    }

    /// Walks the pointer-chained free list looking for `count` contiguous
    /// cells. Only ever finds a run when one exists among cells popped in
    /// ascending address order (the common case right after a slab
    /// insert); a caller needing guaranteed array support should prefer a
    /// dedicated arena instead, per the pool allocator's contract.
    fn allocate_contiguous(&self, list: &FreeList, count: usize) -> Option<NonNull<u8>> {
        let node_size = list.node_size();
        let mut run: Vec<NonNull<u8>> = Vec::new();
        loop {
            let cell = list.allocate()?;
            let extends =
                run.last().is_some_and(|&last| cell.as_ptr() as usize == last.as_ptr() as usize + node_size);
            if extends || run.is_empty() {
                run.push(cell);
            } else {
                for c in run.drain(..) {
                    unsafe { list.deallocate(c) };
                }
                run.push(cell);
            }
            if run.len() == count {
                return Some(run[0]);
            }
        }
    }

    pub fn max_node_size(&self) -> usize {
        self.node_size
    }

    pub fn max_alignment(&self) -> usize {
        self.alignment
    }
}

unsafe impl Allocator for PoolAllocator {
    unsafe fn allocate_node(&self, size: usize, alignment: usize) -> AllocResult<NonNull<u8>> {
        if size > self.node_size || alignment > self.alignment {
            self.stats.record_failure();
            return Err(AllocError::bad_size(
                self.info,
                core::alloc::Layout::from_size_align(size, alignment)
                    .unwrap_or_else(|_| core::alloc::Layout::new::<u8>()),
                self.node_size,
            ));
        }

        let cell = match self.pop_cell() {
            Some(cell) => cell,
            None => {
                self.refill_from_block()?;
                self.pop_cell().ok_or_else(|| {
                    self.stats.record_failure();
                    AllocError::out_of_memory(
                        self.info,
                        core::alloc::Layout::from_size_align(size, alignment)
                            .unwrap_or_else(|_| core::alloc::Layout::new::<u8>()),
                    )
                })?
            }
        };
        debug_assert!(is_aligned(cell.as_ptr() as usize, alignment));
        Self::fill(cell, self.node_size, self.config.alloc_pattern);
        self.stats.record_alloc(self.node_size);
        Ok(cell)
    }

    unsafe fn deallocate_node(&self, ptr: NonNull<u8>, _size: usize, _alignment: usize) {
        Self::fill(ptr, self.node_size, self.config.dealloc_pattern);
        self.push_cell(ptr);
        self.stats.record_dealloc(self.node_size);
    }

    fn max_node_size(&self) -> usize {
        self.node_size
    }

    fn max_alignment(&self) -> usize {
        self.alignment
    }

    unsafe fn allocate_array(
        &self, count: usize, size: usize, alignment: usize,
    ) -> AllocResult<NonNull<u8>> {
        if size > self.node_size || alignment > self.alignment {
            return Err(AllocError::bad_size(
                self.info,
                core::alloc::Layout::from_size_align(size, alignment)
                    .unwrap_or_else(|_| core::alloc::Layout::new::<u8>()),
                self.node_size,
            ));
        }
        match &self.free {
            FreeListStorage::Pointer(list) => self
                .allocate_contiguous(list, count)
                .ok_or_else(|| AllocError::new(AllocErrorKind::BadAllocationSize).with_info(self.info)),
            FreeListStorage::Small(_) => {
                Err(AllocError::new(AllocErrorKind::BadAllocationSize)
                    .with_info(self.info)
                    .with_message("small-node pools do not support array allocation"))
            }
        }
    }

    unsafe fn deallocate_array(&self, ptr: NonNull<u8>, count: usize, _size: usize, _alignment: usize) {
        if let FreeListStorage::Pointer(list) = &self.free {
            for i in 0..count {
                let cell =
                    unsafe { NonNull::new_unchecked(ptr.as_ptr().add(i * list.node_size())) };
                unsafe { list.deallocate(cell) };
            }
        }
    }
}

impl AllocatorCapabilities for PoolAllocator {
    const STATEFUL: bool = true;
    const ARRAY_AWARE: bool = true;
}

impl StatisticsProvider for PoolAllocator {
    fn stats(&self) -> AllocatorStats {
        self.stats.snapshot()
    }
}
