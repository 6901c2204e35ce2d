//! The storage/reference polymorphism layer (spec component K): adapts any
//! [`Allocator`] into a uniform handle, direct or by reference, behind an
//! optional mutex, with a type-erased variant for callers that cannot name
//! the concrete allocator type.

use core::marker::PhantomData;
use core::mem::{self, ManuallyDrop, MaybeUninit};
use core::ptr::NonNull;

use crate::error::AllocResult;
use crate::pool::PoolAllocator;
use crate::stack::StackAllocator;
use crate::system::SystemAllocator;
use crate::traits::{Allocator, AllocatorCapabilities};

/// Either owns an allocator or borrows one. Moving `Owned` moves the
/// allocator with it; `Ref` only ever borrows — the caller answers for the
/// referent outliving the wrapper.
pub enum Storage<'a, A: Allocator> {
    Owned(A),
    Ref(&'a A),
}

impl<'a, A: Allocator> Storage<'a, A> {
    pub fn get_allocator(&self) -> &A {
        match self {
            Storage::Owned(a) => a,
            Storage::Ref(a) => a,
        }
    }
}

unsafe impl<'a, A: Allocator> Allocator for Storage<'a, A> {
    unsafe fn allocate_node(&self, size: usize, alignment: usize) -> AllocResult<NonNull<u8>> {
        unsafe { self.get_allocator().allocate_node(size, alignment) }
    }

    unsafe fn deallocate_node(&self, ptr: NonNull<u8>, size: usize, alignment: usize) {
        unsafe { self.get_allocator().deallocate_node(ptr, size, alignment) };
    }

    fn max_node_size(&self) -> usize {
        self.get_allocator().max_node_size()
    }

    fn max_alignment(&self) -> usize {
        self.get_allocator().max_alignment()
    }

    unsafe fn allocate_array(
        &self, count: usize, size: usize, alignment: usize,
    ) -> AllocResult<NonNull<u8>> {
        unsafe { self.get_allocator().allocate_array(count, size, alignment) }
    }

    unsafe fn deallocate_array(&self, ptr: NonNull<u8>, count: usize, size: usize, alignment: usize) {
        unsafe { self.get_allocator().deallocate_array(ptr, count, size, alignment) };
    }

    fn max_array_size(&self) -> usize {
        self.get_allocator().max_array_size()
    }
}

/// Mutual-exclusion capability composed into a storage wrapper.
///
/// `NoLock` is a zero-sized type: stateless allocators (and single-threaded
/// callers of stateful ones) pay nothing for it. `MutexLock` guards each
/// call with a real `std::sync::Mutex`; its `with_locked` holds the lock for
/// the whole closure, so batched operations only pay one acquisition.
pub trait Lock {
    fn with_locked<R>(&self, f: impl FnOnce() -> R) -> R;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoLock;

impl Lock for NoLock {
    fn with_locked<R>(&self, f: impl FnOnce() -> R) -> R {
        f()
    }
}

#[derive(Default)]
pub struct MutexLock {
    inner: std::sync::Mutex<()>,
}

impl Lock for MutexLock {
    fn with_locked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.inner.lock().expect("storage mutex poisoned");
        f()
    }
}

/// A [`Storage`] guarded by a [`Lock`] policy, presenting the same
/// `Allocator` surface with each call serialized through the lock.
pub struct LockedStorage<'a, A: Allocator, L: Lock = NoLock> {
    storage: Storage<'a, A>,
    lock: L,
}

impl<'a, A: Allocator> LockedStorage<'a, A, NoLock> {
    pub fn owned(allocator: A) -> Self {
        Self { storage: Storage::Owned(allocator), lock: NoLock }
    }

    pub fn borrowed(allocator: &'a A) -> Self {
        Self { storage: Storage::Ref(allocator), lock: NoLock }
    }
}

impl<'a, A: Allocator> LockedStorage<'a, A, MutexLock> {
    pub fn owned_synchronized(allocator: A) -> Self {
        Self { storage: Storage::Owned(allocator), lock: MutexLock::default() }
    }
}

impl<'a, A: Allocator, L: Lock> LockedStorage<'a, A, L> {
    pub fn get_allocator(&self) -> &A {
        self.storage.get_allocator()
    }

    pub fn with_locked<R>(&self, f: impl FnOnce(&A) -> R) -> R {
        self.lock.with_locked(|| f(self.storage.get_allocator()))
    }
}

/// Union of the crate's own concrete allocators, used only to size and align
/// [`ErasedAllocator`]'s inline buffer to a deliberately chosen worst-case
/// instantiation (spec §4.K) without hand-guessing a byte count. Its fields
/// are never read; each is wrapped in `ManuallyDrop` purely so the union can
/// hold non-`Copy` types.
#[allow(dead_code)]
union ErasedCapacityProbe {
    system: ManuallyDrop<SystemAllocator>,
    pool: ManuallyDrop<PoolAllocator>,
    stack: ManuallyDrop<StackAllocator>,
}

/// Worst-case inline capacity a type-erased allocator is allowed to need:
/// exactly large enough for the biggest concrete allocator this crate ships,
/// recomputed automatically if that allocator's fields ever change.
pub const ERASED_INLINE_CAPACITY: usize = mem::size_of::<ErasedCapacityProbe>();

/// Inline byte buffer backing an [`ErasedAllocator`], aligned at least as
/// strictly as [`ErasedCapacityProbe`] via a zero-sized array field (a
/// zero-length array still contributes its element type's alignment to the
/// struct, without taking any space itself).
#[repr(C)]
struct ErasedStorage {
    bytes: [MaybeUninit<u8>; ERASED_INLINE_CAPACITY],
    _align: [ErasedCapacityProbe; 0],
}

/// Function-pointer vtable dispatching `Allocator` calls against the bytes
/// packed into an [`ErasedStorage`], the same `*const ()`-plus-vtable shape
/// as `core::task::RawWakerVTable`.
struct ErasedVTable {
    allocate_node: unsafe fn(*const (), usize, usize) -> AllocResult<NonNull<u8>>,
    deallocate_node: unsafe fn(*const (), NonNull<u8>, usize, usize),
    max_node_size: unsafe fn(*const ()) -> usize,
    max_alignment: unsafe fn(*const ()) -> usize,
    drop_in_place: unsafe fn(*mut ()),
}

struct VTableFor<A>(PhantomData<A>);

impl<A: Allocator + 'static> VTableFor<A> {
    const VTABLE: ErasedVTable = ErasedVTable {
        allocate_node: Self::allocate_node,
        deallocate_node: Self::deallocate_node,
        max_node_size: Self::max_node_size,
        max_alignment: Self::max_alignment,
        drop_in_place: Self::drop_in_place,
    };

    unsafe fn allocate_node(
        storage: *const (), size: usize, alignment: usize,
    ) -> AllocResult<NonNull<u8>> {
        unsafe { (*(storage as *const A)).allocate_node(size, alignment) }
    }

    unsafe fn deallocate_node(storage: *const (), ptr: NonNull<u8>, size: usize, alignment: usize) {
        unsafe { (*(storage as *const A)).deallocate_node(ptr, size, alignment) };
    }

    unsafe fn max_node_size(storage: *const ()) -> usize {
        unsafe { (*(storage as *const A)).max_node_size() }
    }

    unsafe fn max_alignment(storage: *const ()) -> usize {
        unsafe { (*(storage as *const A)).max_alignment() }
    }

    unsafe fn drop_in_place(storage: *mut ()) {
        unsafe { core::ptr::drop_in_place(storage as *mut A) };
    }
}

/// A type-erased allocator: any `Allocator + 'static` is packed into a fixed
/// inline buffer (no heap pointer, see [`ERASED_INLINE_CAPACITY`]) alongside
/// a `'static` vtable reference. Construction refuses, via a `const`
/// assertion, any type that would not fit the buffer.
pub struct ErasedAllocator {
    storage: ErasedStorage,
    vtable: &'static ErasedVTable,
}

impl ErasedAllocator {
    /// Panics at construction (the assertion is `const`-evaluable, so a
    /// fixed, too-large `A` is rejected before any bytes are written) rather
    /// than erase a type whose size or alignment exceeds the inline buffer.
    pub fn new<A: Allocator + 'static>(allocator: A) -> Self {
        const fn assert_fits<A>() {
            assert!(
                mem::size_of::<A>() <= ERASED_INLINE_CAPACITY,
                "allocator exceeds ErasedAllocator's inline capacity contract"
            );
            assert!(
                mem::align_of::<A>() <= mem::align_of::<ErasedCapacityProbe>(),
                "allocator's alignment exceeds ErasedAllocator's inline buffer alignment"
            );
        }
        assert_fits::<A>();

        let mut storage =
            ErasedStorage { bytes: [MaybeUninit::uninit(); ERASED_INLINE_CAPACITY], _align: [] };
        unsafe {
            (storage.bytes.as_mut_ptr() as *mut A).write(allocator);
        }

        Self { storage, vtable: &VTableFor::<A>::VTABLE }
    }

    fn data_ptr(&self) -> *const () {
        self.storage.bytes.as_ptr() as *const ()
    }
}

unsafe impl Allocator for ErasedAllocator {
    unsafe fn allocate_node(&self, size: usize, alignment: usize) -> AllocResult<NonNull<u8>> {
        unsafe { (self.vtable.allocate_node)(self.data_ptr(), size, alignment) }
    }

    unsafe fn deallocate_node(&self, ptr: NonNull<u8>, size: usize, alignment: usize) {
        unsafe { (self.vtable.deallocate_node)(self.data_ptr(), ptr, size, alignment) };
    }

    fn max_node_size(&self) -> usize {
        unsafe { (self.vtable.max_node_size)(self.data_ptr()) }
    }

    fn max_alignment(&self) -> usize {
        unsafe { (self.vtable.max_alignment)(self.data_ptr()) }
    }
}

impl Drop for ErasedAllocator {
    fn drop(&mut self) {
        unsafe { (self.vtable.drop_in_place)(self.storage.bytes.as_mut_ptr() as *mut ()) };
    }
}

impl AllocatorCapabilities for ErasedAllocator {
    const STATEFUL: bool = true;
    const ARRAY_AWARE: bool = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{PoolAllocator, PoolConfig};
    use crate::stack::{StackAllocator, StackConfig};

    #[test]
    fn owned_storage_forwards_to_allocator() {
        let pool = PoolAllocator::with_config(32, 8, 8, PoolConfig::default()).unwrap();
        let storage = Storage::Owned(pool);
        unsafe {
            let ptr = storage.allocate_node(32, 8).unwrap();
            storage.deallocate_node(ptr, 32, 8);
        }
        assert_eq!(storage.max_node_size(), 32);
    }

    #[test]
    fn ref_storage_borrows_without_moving() {
        let pool = PoolAllocator::with_config(16, 8, 4, PoolConfig::default()).unwrap();
        let storage = Storage::Ref(&pool);
        unsafe {
            let ptr = storage.allocate_node(16, 8).unwrap();
            pool.deallocate_node(ptr, 16, 8);
        }
    }

    #[test]
    fn locked_storage_serializes_batched_calls() {
        let locked = LockedStorage::owned_synchronized(
            PoolAllocator::with_config(16, 8, 4, PoolConfig::default()).unwrap(),
        );
        locked.with_locked(|pool| unsafe {
            let a = pool.allocate_node(16, 8).unwrap();
            let b = pool.allocate_node(16, 8).unwrap();
            pool.deallocate_node(a, 16, 8);
            pool.deallocate_node(b, 16, 8);
        });
    }

    /// Scenario S6: a type-erased reference wraps both a stateful pool and
    /// a stateful stack allocator behind the same interface.
    #[test]
    fn scenario_s6_erased_wraps_heterogeneous_allocators() {
        let pool = PoolAllocator::with_config(16, 8, 4, PoolConfig::default()).unwrap();
        let stack = StackAllocator::with_config(256, StackConfig::default()).unwrap();

        let erased_pool = ErasedAllocator::new(pool);
        let erased_stack = ErasedAllocator::new(stack);

        for erased in [&erased_pool, &erased_stack] {
            unsafe {
                let ptr = erased.allocate_node(16, 8).unwrap();
                erased.deallocate_node(ptr, 16, 8);
            }
        }
    }

    /// Scenario S6's stateless half: a zero-sized allocator erases into the
    /// same fixed-size handle as a stateful one (no heap pointer grows the
    /// handle the way `Box<dyn Allocator>` would).
    #[test]
    fn scenario_s6_stateless_allocator_stores_no_heap_pointer() {
        use crate::system::SystemAllocator;

        assert_eq!(mem::size_of::<SystemAllocator>(), 0);

        let erased_system = ErasedAllocator::new(SystemAllocator::new());
        let erased_pool =
            ErasedAllocator::new(PoolAllocator::with_config(16, 8, 4, PoolConfig::default()).unwrap());

        // The handle is exactly the inline buffer plus one vtable reference
        // for every instantiation, stateless or not: erasing a zero-sized
        // allocator does not shrink it below that, and erasing a stateful
        // one does not grow it with a separate heap allocation.
        let expected_handle_size = mem::size_of::<ErasedStorage>() + mem::size_of::<usize>();
        assert_eq!(mem::size_of::<ErasedAllocator>(), expected_handle_size);
        assert_eq!(mem::size_of_val(&erased_system), mem::size_of_val(&erased_pool));

        unsafe {
            let ptr = erased_system.allocate_node(32, 8).unwrap();
            erased_system.deallocate_node(ptr, 32, 8);
        }
    }
}
