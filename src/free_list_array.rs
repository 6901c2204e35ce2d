//! Size-bucketed free-list array (spec component F): one [`FreeList`] per
//! size class, dispatched by a [`SizeClassPolicy`].

use core::alloc::Layout;
use core::ptr::NonNull;

use crate::align::ilog2_ceil;
use crate::error::{AllocError, AllocResult, AllocatorInfo};
use crate::free_list::FreeList;

/// Maps a requested size to a bucket index and back. `index_from_size(s)`
/// must pick a bucket whose `size_from_index` is `>= s`.
pub trait SizeClassPolicy {
    fn index_from_size(&self, size: usize) -> usize;
    fn size_from_index(&self, index: usize) -> usize;
    fn max_index(&self) -> usize;
}

/// `ceil(log2(size))` bucketing: bucket `i` serves sizes up to `1 << i`.
#[derive(Debug, Clone, Copy)]
pub struct Log2Policy {
    max_index: usize,
}

impl Log2Policy {
    pub fn new(max_node_size: usize) -> Self {
        Self { max_index: ilog2_ceil(max_node_size.max(1)) as usize }
    }
}

impl SizeClassPolicy for Log2Policy {
    fn index_from_size(&self, size: usize) -> usize {
        ilog2_ceil(size.max(1)) as usize
    }

    fn size_from_index(&self, index: usize) -> usize {
        1usize << index
    }

    fn max_index(&self) -> usize {
        self.max_index
    }
}

/// A fixed-length vector of free lists, one per size class of `P`.
pub struct FreeListArray<P: SizeClassPolicy = Log2Policy> {
    policy: P,
    lists: Vec<FreeList>,
    info: AllocatorInfo,
}

impl FreeListArray<Log2Policy> {
    pub fn new(max_node_size: usize, info: AllocatorInfo) -> Self {
        Self::with_policy(Log2Policy::new(max_node_size), info)
    }
}

impl<P: SizeClassPolicy> FreeListArray<P> {
    pub fn with_policy(policy: P, info: AllocatorInfo) -> Self {
        let lists =
            (0..=policy.max_index()).map(|i| FreeList::new(policy.size_from_index(i))).collect();
        Self { policy, lists, info }
    }

    fn bucket_for(&self, size: usize) -> AllocResult<usize> {
        let index = self.policy.index_from_size(size);
        if index > self.policy.max_index() {
            let bound = self.policy.size_from_index(self.policy.max_index());
            let layout = Layout::from_size_align(size, 1).unwrap_or_else(|_| Layout::new::<u8>());
            return Err(AllocError::bad_size(self.info, layout, bound));
        }
        Ok(index)
    }

    pub fn list(&self, index: usize) -> &FreeList {
        &self.lists[index]
    }

    pub fn list_for_size(&self, size: usize) -> AllocResult<&FreeList> {
        Ok(&self.lists[self.bucket_for(size)?])
    }

    pub fn allocate(&self, size: usize) -> AllocResult<Option<NonNull<u8>>> {
        Ok(self.list_for_size(size)?.allocate())
    }

    /// # Safety
    /// `cell` must have come from `allocate(size)` (or a slab inserted for
    /// that bucket) on this same array and not currently be free.
    pub unsafe fn deallocate(&self, size: usize, cell: NonNull<u8>) -> AllocResult<()> {
        unsafe { self.list_for_size(size)?.deallocate(cell) };
        Ok(())
    }

    /// # Safety
    /// `buffer` must denote `buf_size` writable bytes outliving every cell
    /// handed out of the bucket for `size`.
    pub unsafe fn insert(&self, size: usize, buffer: NonNull<u8>, buf_size: usize) -> AllocResult<usize> {
        Ok(unsafe { self.list_for_size(size)?.insert(buffer, buf_size) })
    }

    pub fn max_index(&self) -> usize {
        self.policy.max_index()
    }
}
