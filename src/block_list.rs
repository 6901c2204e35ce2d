//! Intrusive slab stack (spec component D): a LIFO of `used` blocks and a
//! LIFO of `free-cache` blocks recycled before asking the upstream
//! allocator for anything new. Each slab embeds its own `{prev, size}`
//! header in its first bytes; everything after that header is usable.

use core::alloc::Layout;
use core::mem;
use core::ptr::NonNull;

use crate::align::max_alignment;
use crate::error::{AllocError, AllocResult, AllocatorInfo};

#[repr(C)]
struct SlabHeader {
    prev: Option<NonNull<u8>>,
    size: usize,
}

/// Byte offset from a slab's base to its usable region. Upper layers
/// (stack/pool allocators) rely on this to translate between the total
/// size the block list tracks and the usable size they can hand clients;
/// the two must never drift apart.
pub const HEADER_SIZE: usize = mem::size_of::<SlabHeader>();

#[inline]
fn header_ptr(slab: NonNull<u8>) -> NonNull<SlabHeader> {
    slab.cast()
}

#[inline]
unsafe fn read_header(slab: NonNull<u8>) -> SlabHeader {
    unsafe { header_ptr(slab).as_ptr().read() }
}

#[inline]
unsafe fn write_header(slab: NonNull<u8>, header: SlabHeader) {
    unsafe { header_ptr(slab).as_ptr().write(header) };
}

#[inline]
fn usable_ptr(slab: NonNull<u8>) -> NonNull<u8> {
    unsafe { NonNull::new_unchecked(slab.as_ptr().add(HEADER_SIZE)) }
}

/// A slab's usable memory, handed back from [`BlockList::allocate`].
#[derive(Clone, Copy)]
pub struct Block {
    pub memory: NonNull<u8>,
    pub size: usize,
}

/// A stack of slabs with a recycled free-cache, growing geometrically.
pub struct BlockList {
    used: Option<NonNull<u8>>,
    used_count: usize,
    free_cache: Option<NonNull<u8>>,
    free_count: usize,
    cur_block_size: usize,
    growth_factor: usize,
    info: AllocatorInfo,
}

fn slab_layout(total_size: usize) -> Layout {
    Layout::from_size_align(total_size, max_alignment()).expect("block list slab layout")
}

impl BlockList {
    pub fn new(initial_block_size: usize, info: AllocatorInfo) -> Self {
        Self {
            used: None,
            used_count: 0,
            free_cache: None,
            free_count: 0,
            cur_block_size: initial_block_size.max(HEADER_SIZE + 1),
            growth_factor: 2,
            info,
        }
    }

    /// Returns the usable memory of a slab, pulling from the free-cache if
    /// one is available, otherwise asking the upstream allocator for
    /// `next_block_size()` bytes and growing that size for next time.
    pub fn allocate(&mut self) -> AllocResult<Block> {
        if let Some(slab) = self.free_cache {
            let header = unsafe { read_header(slab) };
            self.free_cache = header.prev;
            self.free_count -= 1;
            unsafe { write_header(slab, SlabHeader { prev: self.used, size: header.size }) };
            self.used = Some(slab);
            self.used_count += 1;
            return Ok(Block { memory: usable_ptr(slab), size: header.size - HEADER_SIZE });
        }

        let total_size = self.cur_block_size;
        let layout = slab_layout(total_size);
        let raw = unsafe { std::alloc::alloc(layout) };
        let slab = NonNull::new(raw).ok_or_else(|| AllocError::out_of_memory(self.info, layout))?;
        unsafe { write_header(slab, SlabHeader { prev: self.used, size: total_size }) };
        self.used = Some(slab);
        self.used_count += 1;
        self.cur_block_size = total_size * self.growth_factor;
        Ok(Block { memory: usable_ptr(slab), size: total_size - HEADER_SIZE })
    }

    /// Moves the most recently allocated slab from `used` to `free-cache`
    /// without touching the upstream allocator.
    pub fn deallocate(&mut self) {
        let Some(slab) = self.used else { return };
        let header = unsafe { read_header(slab) };
        self.used = header.prev;
        self.used_count -= 1;
        unsafe { write_header(slab, SlabHeader { prev: self.free_cache, size: header.size }) };
        self.free_cache = Some(slab);
        self.free_count += 1;
    }

    /// Moves slabs from `used` to `free-cache` until `used_count` matches
    /// `target_count`. Used by the memory stack's unwind to bound the
    /// range that needs re-filling under debug instrumentation.
    pub fn deallocate_to(&mut self, target_count: usize) {
        while self.used_count > target_count {
            self.deallocate();
        }
    }

    /// Returns every free-cache slab to the upstream allocator.
    pub fn shrink_to_fit(&mut self) {
        while let Some(slab) = self.free_cache {
            let header = unsafe { read_header(slab) };
            self.free_cache = header.prev;
            self.free_count -= 1;
            unsafe { std::alloc::dealloc(slab.as_ptr(), slab_layout(header.size)) };
        }
    }

    /// Usable memory and size of the most recently allocated `used` slab.
    pub fn top(&self) -> Option<Block> {
        let slab = self.used?;
        let header = unsafe { read_header(slab) };
        Some(Block { memory: usable_ptr(slab), size: header.size - HEADER_SIZE })
    }

    /// Number of slabs currently in `used`.
    pub fn len(&self) -> usize {
        self.used_count
    }

    pub fn is_empty(&self) -> bool {
        self.used_count == 0
    }

    /// Number of slabs currently sitting in the free-cache, available for
    /// reuse by a future `allocate()` without touching the upstream
    /// allocator.
    pub fn cached_len(&self) -> usize {
        self.free_count
    }

    pub fn next_block_size(&self) -> usize {
        self.cur_block_size - HEADER_SIZE
    }
}

impl Drop for BlockList {
    fn drop(&mut self) {
        self.shrink_to_fit();
        while let Some(slab) = self.used {
            let header = unsafe { read_header(slab) };
            self.used = header.prev;
            unsafe { std::alloc::dealloc(slab.as_ptr(), slab_layout(header.size)) };
        }
        self.used_count = 0;
    }
}
