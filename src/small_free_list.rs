//! Free list variant for very small, equal-size cells (spec component C):
//! instead of a pointer-sized link per cell, cells are chained by a
//! single-byte offset within a 255-cell chunk. A chunk header of three
//! bytes (`first`, `count`, `capacity`) precedes the cells.
//!
//! Chunks themselves are tracked in a plain `Vec` owned by the list rather
//! than intrusively linked — with chunk counts small relative to node
//! counts this keeps `allocate`/`deallocate` a short linear scan without
//! adding a fourth header byte, matching the source design's accepted
//! tradeoff (see the crate-level design notes on the linear chunk scan).

use core::mem;
use core::ptr::NonNull;

const HEADER_SIZE: usize = 3;
const SENTINEL: u8 = u8::MAX;

/// Raw view over one chunk's header bytes, living at the chunk's base
/// address. Never constructed as a Rust value placed in memory — only used
/// as a cursor for unsafe byte reads/writes, confined to this module.
struct ChunkView {
    base: NonNull<u8>,
}

impl ChunkView {
    #[inline]
    unsafe fn first(&self) -> u8 {
        unsafe { self.base.as_ptr().read() }
    }
    #[inline]
    unsafe fn set_first(&self, v: u8) {
        unsafe { self.base.as_ptr().write(v) };
    }
    #[inline]
    unsafe fn count(&self) -> u8 {
        unsafe { self.base.as_ptr().add(1).read() }
    }
    #[inline]
    unsafe fn set_count(&self, v: u8) {
        unsafe { self.base.as_ptr().add(1).write(v) };
    }
    #[inline]
    unsafe fn capacity(&self) -> u8 {
        unsafe { self.base.as_ptr().add(2).read() }
    }
    #[inline]
    fn cells_base(&self) -> NonNull<u8> {
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(HEADER_SIZE)) }
    }
}

/// A free list of equal-size, ≤255-byte-addressable cells (`node_size` in
/// `1..=255`), chained with byte offsets instead of pointers.
pub struct SmallFreeList {
    node_size: u8,
    chunks: Vec<ChunkView>,
    cursor: usize,
    total_free: usize,
}

impl SmallFreeList {
    pub fn new(node_size: u8) -> Self {
        assert!(node_size >= 1, "small free list node_size must be at least 1");
        Self { node_size, chunks: Vec::new(), cursor: 0, total_free: 0 }
    }

    pub fn node_size(&self) -> u8 {
        self.node_size
    }

    pub fn capacity(&self) -> usize {
        self.total_free
    }

    pub fn is_empty(&self) -> bool {
        self.total_free == 0
    }

    /// Partitions `buffer[..size]` into one or more chunks of at most 255
    /// cells each, prefixed by their headers, and registers them. Returns
    /// the number of cells made available.
    ///
    /// # Safety
    /// `buffer` must denote `size` writable bytes outliving every cell
    /// handed out from the resulting chunks.
    pub unsafe fn insert(&mut self, buffer: NonNull<u8>, size: usize) -> usize {
        let node_size = self.node_size as usize;
        let mut offset = 0usize;
        let mut total_cells = 0usize;

        while size - offset >= HEADER_SIZE + node_size {
            let remaining = size - offset - HEADER_SIZE;
            let capacity = (remaining / node_size).min(255);
            if capacity == 0 {
                break;
            }
            let chunk_base =
                unsafe { NonNull::new_unchecked(buffer.as_ptr().add(offset)) };
            let view = ChunkView { base: chunk_base };
            unsafe {
                view.set_first(0);
                view.set_count(capacity as u8);
                view.base.as_ptr().add(2).write(capacity as u8);
                let cells = view.cells_base();
                for i in 0..capacity {
                    let next = if i + 1 == capacity { SENTINEL } else { (i + 1) as u8 };
                    cells.as_ptr().add(i * node_size).write(next);
                }
            }
            total_cells += capacity;
            offset += HEADER_SIZE + capacity * node_size;
            self.chunks.push(view);
        }

        self.total_free += total_cells;
        total_cells
    }

    /// Scans chunks starting from the cursor for one with a free cell.
    pub fn allocate(&mut self) -> Option<NonNull<u8>> {
        if self.chunks.is_empty() {
            return None;
        }
        let len = self.chunks.len();
        for step in 0..len {
            let idx = (self.cursor + step) % len;
            let view = &self.chunks[idx];
            let first = unsafe { view.first() };
            if first != SENTINEL {
                let node_size = self.node_size as usize;
                let cell = unsafe {
                    NonNull::new_unchecked(view.cells_base().as_ptr().add(first as usize * node_size))
                };
                let next = unsafe { cell.as_ptr().read() };
                unsafe {
                    view.set_first(next);
                    view.set_count(view.count() - 1);
                }
                self.cursor = idx;
                self.total_free -= 1;
                return Some(cell);
            }
        }
        None
    }

    /// Locates the chunk owning `cell` by linear scan and pushes it back
    /// onto that chunk's free list.
    ///
    /// # Safety
    /// `cell` must have come from this list's `allocate` (or an inserted
    /// slab) and not currently be free.
    pub unsafe fn deallocate(&mut self, cell: NonNull<u8>) {
        let node_size = self.node_size as usize;
        let addr = cell.as_ptr() as usize;
        for view in &self.chunks {
            let cells_base = view.cells_base().as_ptr() as usize;
            let span = unsafe { view.capacity() } as usize * node_size;
            if addr >= cells_base && addr < cells_base + span {
                let idx = ((addr - cells_base) / node_size) as u8;
                unsafe {
                    let old_first = view.first();
                    cell.as_ptr().write(old_first);
                    view.set_first(idx);
                    view.set_count(view.count() + 1);
                }
                self.total_free += 1;
                return;
            }
        }
        debug_assert!(false, "deallocate: pointer does not belong to any chunk in this list");
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert_buffer(list: &mut SmallFreeList, cells: usize) -> Box<[u8]> {
        let node_size = list.node_size() as usize;
        let mut chunks_needed = 0;
        let mut remaining = cells;
        while remaining > 0 {
            let this = remaining.min(255);
            chunks_needed += HEADER_SIZE + this * node_size;
            remaining -= this;
        }
        let mut buf = vec![0u8; chunks_needed].into_boxed_slice();
        let ptr = unsafe { NonNull::new_unchecked(buf.as_mut_ptr()) };
        let inserted = unsafe { list.insert(ptr, buf.len()) };
        assert_eq!(inserted, cells);
        buf
    }

    #[test]
    fn one_byte_nodes_span_multiple_chunks() {
        let mut list = SmallFreeList::new(1);
        let _buf = insert_buffer(&mut list, 300);
        assert!(list.chunk_count() >= 2, "300 one-byte cells must span >=2 chunks of <=255");
        assert_eq!(list.capacity(), 300);

        let mut ptrs = Vec::new();
        for _ in 0..300 {
            ptrs.push(list.allocate().expect("cell available"));
        }
        assert!(list.allocate().is_none());

        let mut addrs: Vec<usize> = ptrs.iter().map(|p| p.as_ptr() as usize).collect();
        addrs.sort_unstable();
        addrs.dedup();
        assert_eq!(addrs.len(), 300, "all 300 pointers must be distinct");
    }

    #[test]
    fn round_trip_preserves_free_count() {
        let mut list = SmallFreeList::new(4);
        let _buf = insert_buffer(&mut list, 50);
        let before = list.capacity();
        for _ in 0..20 {
            let cell = list.allocate().unwrap();
            unsafe { list.deallocate(cell) };
        }
        assert_eq!(list.capacity(), before);
    }

    #[test]
    fn offsets_never_exceed_255() {
        let mut list = SmallFreeList::new(1);
        let _buf = insert_buffer(&mut list, 255);
        assert_eq!(list.chunk_count(), 1);
    }

    proptest::proptest! {
        /// Property 2 (Non-aliasing): however many chunks a cell count
        /// spans, every cell handed out before any `deallocate` denotes a
        /// distinct byte range.
        #[test]
        fn allocated_cells_are_pairwise_disjoint(
            node_size in 1u8..32,
            cell_count in 1usize..120,
        ) {
            let mut list = SmallFreeList::new(node_size);
            let _buf = insert_buffer(&mut list, cell_count);

            let mut ranges = Vec::with_capacity(cell_count);
            for _ in 0..cell_count {
                let cell = list.allocate().expect("cell available");
                let start = cell.as_ptr() as usize;
                ranges.push(start..start + node_size as usize);
            }
            for i in 0..ranges.len() {
                for j in (i + 1)..ranges.len() {
                    let disjoint = ranges[i].end <= ranges[j].start || ranges[j].end <= ranges[i].start;
                    proptest::prop_assert!(disjoint, "cells {i} and {j} overlap");
                }
            }
        }
    }
}
