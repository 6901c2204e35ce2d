//! Miri safety tests for the crate's allocators.
//!
//! Run with: cargo +nightly miri test --test miri_safety

#![cfg(miri)]

use slabkit::{Allocator, PoolAllocator, PoolConfig, Resettable, StackAllocator, StackConfig};

#[test]
fn miri_pool_allocator_reuse() {
    let allocator = PoolAllocator::with_config(128, 8, 16, PoolConfig::default()).unwrap();

    unsafe {
        let ptr1 = allocator.allocate_node(128, 8).unwrap();
        std::ptr::write_bytes(ptr1.as_ptr(), 0xFF, 128);
        allocator.deallocate_node(ptr1, 128, 8);

        let ptr2 = allocator.allocate_node(128, 8).unwrap();
        std::ptr::write_bytes(ptr2.as_ptr(), 0xAA, 128);
        assert_eq!(*ptr2.as_ptr(), 0xAA);
        allocator.deallocate_node(ptr2, 128, 8);
    }
}

#[test]
fn miri_stack_allocator_sequential() {
    let allocator = StackAllocator::with_config(8192, StackConfig::default()).unwrap();

    unsafe {
        let ptr1 = allocator.allocate_node(256, 8).unwrap();
        let ptr2 = allocator.allocate_node(256, 8).unwrap();
        let ptr3 = allocator.allocate_node(256, 8).unwrap();

        std::ptr::write_bytes(ptr1.as_ptr(), 1, 256);
        std::ptr::write_bytes(ptr2.as_ptr(), 2, 256);
        std::ptr::write_bytes(ptr3.as_ptr(), 3, 256);

        assert_eq!(*ptr1.as_ptr(), 1);
        assert_eq!(*ptr2.as_ptr(), 2);
        assert_eq!(*ptr3.as_ptr(), 3);
    }
}

#[test]
fn miri_alignment_safety() {
    let allocator = StackAllocator::with_config(4096, StackConfig::default()).unwrap();

    unsafe {
        for &align in &[1usize, 2, 4, 8, 16, 32, 64] {
            let ptr = allocator.allocate_node(128, align).unwrap();
            let addr = ptr.as_ptr() as usize;
            assert_eq!(addr % align, 0, "pointer not aligned to {align}");
            std::ptr::write_bytes(ptr.as_ptr(), 0xFF, 128);
        }
    }
}

#[test]
fn miri_reset_safety() {
    let allocator = StackAllocator::with_config(4096, StackConfig::default()).unwrap();

    unsafe {
        let ptr1 = allocator.allocate_node(64, 8).unwrap();
        std::ptr::write_bytes(ptr1.as_ptr(), 0x11, 64);

        allocator.reset();

        let ptr2 = allocator.allocate_node(64, 8).unwrap();
        std::ptr::write_bytes(ptr2.as_ptr(), 0x22, 64);
        assert_eq!(*ptr2.as_ptr(), 0x22);
    }
}

#[test]
fn miri_no_overlap() {
    let allocator = PoolAllocator::with_config(128, 8, 16, PoolConfig::default()).unwrap();

    unsafe {
        let mut ptrs = Vec::new();
        for i in 0..10u8 {
            let ptr = allocator.allocate_node(128, 8).unwrap();
            std::ptr::write_bytes(ptr.as_ptr(), i, 128);
            ptrs.push(ptr);
        }

        for (i, ptr) in ptrs.iter().enumerate() {
            assert_eq!(*ptr.as_ptr(), i as u8);
        }

        for ptr in ptrs {
            allocator.deallocate_node(ptr, 128, 8);
        }
    }
}

#[test]
fn miri_pool_exhaustion() {
    let allocator = PoolAllocator::with_config(64, 8, 4, PoolConfig::default()).unwrap();

    unsafe {
        let mut ptrs = Vec::new();
        for _ in 0..4 {
            ptrs.push(allocator.allocate_node(64, 8).unwrap());
        }

        // The pool grows by asking the block list for a fresh slab, so this
        // does not actually fail; it demonstrates growth under Miri instead.
        let grown = allocator.allocate_node(64, 8).unwrap();
        ptrs.push(grown);

        for ptr in ptrs {
            allocator.deallocate_node(ptr, 64, 8);
        }
    }
}

#[test]
fn miri_large_allocation() {
    let allocator = StackAllocator::with_config(10 * 1024 * 1024, StackConfig::default()).unwrap();

    unsafe {
        let ptr = allocator.allocate_node(1024 * 1024, 8).unwrap();
        std::ptr::write_bytes(ptr.as_ptr(), 0xAA, 1);
        std::ptr::write_bytes(ptr.as_ptr().add(1024 * 1024 - 1), 0xBB, 1);
        assert_eq!(*ptr.as_ptr(), 0xAA);
        assert_eq!(*ptr.as_ptr().add(1024 * 1024 - 1), 0xBB);
    }
}

#[test]
fn miri_sequential_access() {
    let allocator = PoolAllocator::with_config(128, 8, 64, PoolConfig::default()).unwrap();

    unsafe {
        for iteration in 0..10u8 {
            let mut ptrs = Vec::new();
            for i in 0..8u8 {
                let ptr = allocator.allocate_node(128, 8).unwrap();
                std::ptr::write_bytes(ptr.as_ptr(), iteration.wrapping_mul(10).wrapping_add(i), 128);
                ptrs.push(ptr);
            }

            for (i, ptr) in ptrs.iter().enumerate() {
                assert_eq!(*ptr.as_ptr(), iteration.wrapping_mul(10).wrapping_add(i as u8));
            }

            for ptr in ptrs {
                allocator.deallocate_node(ptr, 128, 8);
            }
        }
    }
}
