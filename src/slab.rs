use core::cell::UnsafeCell;
use core::ptr::null_mut;

use intrusive_collections::{intrusive_adapter, LinkedListLink, UnsafeRef};

use crate::backend::MemoryProvider;

/// Bookkeeping for one slab, placed at the slab's high end.
///
/// `link` threads the slab into exactly one of its cache's three lists
/// (FREE/PARTIAL/FULL). `data` holds the intra-slab free-list head, the
/// free-object count, and the slab's base address, kept alongside rather
/// than re-derived on every release so `shrink`/`release` don't have to
/// redo the masking arithmetic `slab_header_for_ptr` already does for the
/// opposite lookup.
#[repr(C)]
pub(crate) struct SlabHeader {
    link: LinkedListLink,
    data: UnsafeCell<SlabHeaderData>,
}

pub(crate) struct SlabHeaderData {
    /// Head of the intra-slab free list, or null if the slab is full.
    pub(crate) free_head: *mut u8,
    /// Number of currently-free slots in this slab.
    pub(crate) free_objects: usize,
    /// Base address of the backing region this slab was carved from.
    pub(crate) slab_base: *mut u8,
}

// SlabHeader is only ever touched through the owning Cache, which is itself
// not Sync/Send; these impls exist only so Cache can be used behind external
// synchronization chosen by the caller.
unsafe impl Send for SlabHeader {}
unsafe impl Sync for SlabHeader {}

intrusive_adapter!(pub(crate) SlabAdapter = UnsafeRef<SlabHeader>: SlabHeader { link: LinkedListLink });

impl SlabHeader {
    /// Raw pointer to this slab's interior-mutable bookkeeping.
    ///
    /// Mirrors `UnsafeCell::get`: obtaining the pointer is safe, only
    /// dereferencing it is not. Kept as a raw pointer (rather than handing
    /// back a reference) so callers don't tie its lifetime to a borrow of
    /// the `SlabHeader` itself, which would otherwise fight the borrow
    /// checker every time a caller also wants to move the header's
    /// `UnsafeRef` into a different list in the same scope.
    #[inline]
    pub(crate) fn data_ptr(&self) -> *mut SlabHeaderData {
        self.data.get()
    }
}

/// Pops the highest-priority free slot out of a slab's embedded free list.
///
/// # Safety
/// `data.free_objects` must be greater than zero.
#[inline]
pub(crate) unsafe fn pop_free(data: &mut SlabHeaderData) -> *mut u8 {
    debug_assert!(!data.free_head.is_null());
    let object_ptr = data.free_head;
    data.free_head = *(object_ptr as *const *mut u8);
    data.free_objects -= 1;
    object_ptr
}

/// Pushes a slot back onto a slab's embedded free list.
///
/// # Safety
/// `object_ptr` must be a slot belonging to this slab, not already free.
#[inline]
pub(crate) unsafe fn push_free(data: &mut SlabHeaderData, object_ptr: *mut u8) {
    (object_ptr as *mut *mut u8).write(data.free_head);
    data.free_head = object_ptr;
    data.free_objects += 1;
}

/// Acquires a fresh backing region and lays out one slab in it: the header
/// at the tail, all `slab_objects` slots threaded into the free list in
/// descending-address order (so the first `pop_free` returns the
/// highest-addressed slot).
///
/// # Safety
/// `log2_slab_size`/`slab_size` must agree, and `slab_size -
/// size_of::<SlabHeader>()` must be at least `slab_objects * object_size`.
pub(crate) unsafe fn construct_slab<M: MemoryProvider>(
    memory: &mut M,
    log2_slab_size: u32,
    slab_size: usize,
    object_size: usize,
    slab_objects: usize,
) -> UnsafeRef<SlabHeader> {
    let base = memory.acquire(log2_slab_size);
    if base.is_null() {
        #[cfg(feature = "log")]
        log::error!("memory provider failed to supply a {slab_size}-byte slab");
        panic!("slab allocator: out of memory acquiring a {slab_size}-byte slab");
    }
    debug_assert_eq!(base as usize % slab_size, 0, "provider returned misaligned region");

    let header_ptr = (base as usize + slab_size - core::mem::size_of::<SlabHeader>()) as *mut SlabHeader;
    header_ptr.write(SlabHeader {
        link: LinkedListLink::new(),
        data: UnsafeCell::new(SlabHeaderData {
            free_head: null_mut(),
            free_objects: 0,
            slab_base: base,
        }),
    });
    let data = &mut *(*header_ptr).data_ptr();

    for index in 0..slab_objects {
        let object_ptr = (base as usize + index * object_size) as *mut u8;
        push_free(data, object_ptr);
    }
    debug_assert_eq!(data.free_objects, slab_objects);

    UnsafeRef::from_raw(header_ptr)
}

/// Recovers the slab header for an object pointer previously handed out by
/// this cache, using only alignment arithmetic.
///
/// # Safety
/// `object_ptr` must have been allocated from a slab of exactly `slab_size`
/// bytes, aligned to `slab_size`.
#[inline]
pub(crate) unsafe fn slab_header_for_ptr(object_ptr: *mut u8, slab_size: usize) -> *mut SlabHeader {
    let slab_base = (object_ptr as usize) & !(slab_size - 1);
    (slab_base + slab_size - core::mem::size_of::<SlabHeader>()) as *mut SlabHeader
}
