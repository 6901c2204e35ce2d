//! Construction-time knobs for [`super::PoolAllocator`].

/// Debug fill bytes and statistics toggle for a pool allocator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Byte pattern written into a node right after `allocate_node`.
    pub alloc_pattern: Option<u8>,
    /// Byte pattern written into a node right after `deallocate_node`.
    pub dealloc_pattern: Option<u8>,
    /// Whether to keep running allocation/deallocation counters.
    pub track_stats: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { alloc_pattern: None, dealloc_pattern: None, track_stats: false }
    }
}

impl PoolConfig {
    /// A conservative middle ground suitable for shipping: stats on, no
    /// fill patterns.
    pub fn production() -> Self {
        Self { alloc_pattern: None, dealloc_pattern: None, track_stats: true }
    }

    /// Fill patterns and stats on, to catch use-after-free and double-free
    /// by inspection.
    pub fn debug() -> Self {
        Self { alloc_pattern: Some(0xCD), dealloc_pattern: Some(0xDD), track_stats: true }
    }

    /// Everything off: the hot path has no branches beyond the free list
    /// itself.
    pub fn performance() -> Self {
        Self { alloc_pattern: None, dealloc_pattern: None, track_stats: false }
    }
}
