//! RAII scope over a [`super::StackAllocator`] marker.

use crate::memory_stack::StackMarker;
use crate::stack::allocator::StackAllocator;

/// Takes a marker on construction and releases back to it on drop,
/// regardless of how much was allocated through the scope.
pub struct StackFrame<'a> {
    allocator: &'a StackAllocator,
    marker: StackMarker,
}

impl<'a> StackFrame<'a> {
    pub fn new(allocator: &'a StackAllocator) -> Self {
        let marker = allocator.mark();
        Self { allocator, marker }
    }

    pub fn allocator(&self) -> &'a StackAllocator {
        self.allocator
    }
}

impl Drop for StackFrame<'_> {
    fn drop(&mut self) {
        self.allocator.release(self.marker);
    }
}
