use intrusive_collections::{LinkedList, UnsafeRef};

use crate::backend::MemoryProvider;
use crate::slab::{construct_slab, pop_free, push_free, slab_header_for_ptr, SlabAdapter, SlabHeader};
use crate::{Error, MAX_OBJECT_SIZE, MIN_OBJECT_SIZE, MIN_SLAB_OBJECTS, MIN_SLAB_ORDER};

/// Occupancy counters for a [`Cache`], kept in sync with the three lists on
/// every `alloc`/`free`/`shrink`/`release`. Useful for diagnostics; nothing
/// in the allocator's fast path reads from it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatistics {
    /// Slabs with `free_objects == slab_objects`.
    pub free_slabs: usize,
    /// Slabs with `0 < free_objects < slab_objects`.
    pub partial_slabs: usize,
    /// Slabs with `free_objects == 0`.
    pub full_slabs: usize,
    /// Objects available for allocation without provisioning a new slab.
    pub free_objects: usize,
    /// Objects currently handed out to callers.
    pub allocated_objects: usize,
}

/// The user-facing handle for one object size.
///
/// Owns every slab it has provisioned, threaded across three intrusive
/// lists (FREE / PARTIAL / FULL) by occupancy. `alloc` and `free` are O(1):
/// no list is ever searched, and an object pointer is mapped back to its
/// owning slab by masking rather than through a lookup table.
pub struct Cache<M: MemoryProvider> {
    object_size: usize,
    slab_order: u32,
    slab_size: usize,
    slab_objects: usize,
    pub(crate) free_list: LinkedList<SlabAdapter>,
    pub(crate) partial_list: LinkedList<SlabAdapter>,
    pub(crate) full_list: LinkedList<SlabAdapter>,
    pub(crate) memory: M,
    statistics: CacheStatistics,
}

impl<M: MemoryProvider> Cache<M> {
    /// Initializes a cache for objects of `object_size` bytes and provisions
    /// its first slab onto FREE.
    ///
    /// `slab_order` is chosen as the smallest value, capped at 10, such that
    /// the resulting slab amortizes its header across at least
    /// [`MIN_SLAB_OBJECTS`] slots, unless `object_size` is already large
    /// enough that even the largest slab order can't fit that many.
    pub fn setup(object_size: usize, memory: M) -> Result<Self, Error> {
        if object_size < MIN_OBJECT_SIZE {
            return Err(Error::ObjectTooSmall {
                object_size,
                minimum: MIN_OBJECT_SIZE,
            });
        }
        if object_size >= MAX_OBJECT_SIZE {
            return Err(Error::ObjectTooLarge {
                object_size,
                maximum: MAX_OBJECT_SIZE,
            });
        }

        let mut slab_order: u32 = 0;
        while slab_order < 10 && slab_size_for(slab_order) <= object_size * MIN_SLAB_OBJECTS {
            slab_order += 1;
        }
        let slab_size = slab_size_for(slab_order);
        let slab_objects = (slab_size - core::mem::size_of::<SlabHeader>()) / object_size;

        #[cfg(feature = "log")]
        log::debug!(
            "cache setup: object_size={object_size} slab_order={slab_order} slab_size={slab_size} slab_objects={slab_objects}"
        );

        let mut cache = Self {
            object_size,
            slab_order,
            slab_size,
            slab_objects,
            free_list: LinkedList::new(SlabAdapter::new()),
            partial_list: LinkedList::new(SlabAdapter::new()),
            full_list: LinkedList::new(SlabAdapter::new()),
            memory,
            statistics: CacheStatistics::default(),
        };
        unsafe {
            cache.provision_slab();
        }
        Ok(cache)
    }

    /// Returns a pointer to `object_size()` bytes of uninitialized storage
    /// owned by this cache. Never returns null: if every list is exhausted,
    /// a fresh slab is provisioned (aborting the process if the memory
    /// provider cannot supply one).
    ///
    /// # Safety
    /// Must only be called while `self` is a validly set-up cache.
    pub unsafe fn alloc(&mut self) -> *mut u8 {
        if let Some(header) = self.partial_list.front().get() {
            let data = &mut *header.data_ptr();
            let object_ptr = pop_free(data);
            self.statistics.free_objects -= 1;
            self.statistics.allocated_objects += 1;
            if data.free_objects == 0 {
                let header_ref = self.partial_list.pop_front().unwrap();
                self.statistics.partial_slabs -= 1;
                self.full_list.push_front(header_ref);
                self.statistics.full_slabs += 1;
            }
            return object_ptr;
        }

        if self.free_list.is_empty() {
            self.provision_slab();
        }

        let header_ref = self.free_list.pop_front().unwrap();
        self.statistics.free_slabs -= 1;
        let data = &mut *header_ref.data_ptr();
        let object_ptr = pop_free(data);
        self.statistics.free_objects -= 1;
        self.statistics.allocated_objects += 1;

        if data.free_objects == 0 {
            self.full_list.push_front(header_ref);
            self.statistics.full_slabs += 1;
        } else {
            self.partial_list.push_front(header_ref);
            self.statistics.partial_slabs += 1;
        }
        object_ptr
    }

    /// Returns an object previously handed out by `alloc` on this same
    /// cache to its slab's free list, re-classifying the slab if its
    /// occupancy crossed a list boundary.
    ///
    /// # Safety
    /// `object_ptr` must have originated from `alloc(self)` and must not
    /// already have been freed.
    pub unsafe fn free(&mut self, object_ptr: *mut u8) {
        assert!(!object_ptr.is_null(), "attempt to free a null pointer");

        let header_ptr = slab_header_for_ptr(object_ptr, self.slab_size);
        let data = &mut *(*header_ptr).data_ptr();
        let was_full = data.free_objects == 0;

        assert_ne!(
            data.free_objects, self.slab_objects,
            "attempt to free an object in a slab with no allocated objects (double free or invalid pointer)"
        );

        push_free(data, object_ptr);
        self.statistics.free_objects += 1;
        self.statistics.allocated_objects -= 1;

        if data.free_objects == self.slab_objects {
            if was_full {
                self.full_list.cursor_mut_from_ptr(header_ptr).remove();
                self.statistics.full_slabs -= 1;
            } else {
                self.partial_list.cursor_mut_from_ptr(header_ptr).remove();
                self.statistics.partial_slabs -= 1;
            }
            self.free_list.push_front(UnsafeRef::from_raw(header_ptr));
            self.statistics.free_slabs += 1;
        } else if was_full {
            self.full_list.cursor_mut_from_ptr(header_ptr).remove();
            self.statistics.full_slabs -= 1;
            self.partial_list.push_front(UnsafeRef::from_raw(header_ptr));
            self.statistics.partial_slabs += 1;
        }
    }

    /// Releases every slab currently on FREE back to the memory provider.
    /// Slabs on PARTIAL or FULL are untouched. The allocator never shrinks
    /// implicitly; this is the only routine that reclaims idle memory.
    ///
    /// # Safety
    /// Must only be called while `self` is a validly set-up cache.
    pub unsafe fn shrink(&mut self) {
        while let Some(header_ref) = self.free_list.pop_front() {
            let data = &*header_ref.data_ptr();
            self.memory.release(data.slab_base, MIN_SLAB_ORDER + self.slab_order);
            self.statistics.free_slabs -= 1;
            self.statistics.free_objects -= self.slab_objects;
        }
    }

    /// Releases every slab on all three lists back to the memory provider
    /// and consumes the cache. Any objects still allocated from it are
    /// invalidated; the caller is responsible for having freed them first.
    pub fn release(self) {
        // Teardown happens in `Drop`; this method exists to give callers an
        // explicit, self-documenting counterpart to `setup`.
    }

    /// Size in bytes of one object serviced by this cache.
    pub fn object_size(&self) -> usize {
        self.object_size
    }

    /// Size in bytes of one backing slab (`2^(MIN_SLAB_ORDER + slab_order)`).
    pub fn slab_size(&self) -> usize {
        self.slab_size
    }

    /// Number of object slots per slab.
    pub fn slab_objects(&self) -> usize {
        self.slab_objects
    }

    /// Current occupancy counters.
    pub fn statistics(&self) -> CacheStatistics {
        self.statistics
    }

    unsafe fn provision_slab(&mut self) {
        let header_ref = construct_slab(
            &mut self.memory,
            MIN_SLAB_ORDER + self.slab_order,
            self.slab_size,
            self.object_size,
            self.slab_objects,
        );
        self.statistics.free_slabs += 1;
        self.statistics.free_objects += self.slab_objects;
        self.free_list.push_front(header_ref);
    }

    unsafe fn release_all(&mut self) {
        self.shrink();
        while let Some(header_ref) = self.partial_list.pop_front() {
            let data = &*header_ref.data_ptr();
            self.memory.release(data.slab_base, MIN_SLAB_ORDER + self.slab_order);
        }
        while let Some(header_ref) = self.full_list.pop_front() {
            let data = &*header_ref.data_ptr();
            self.memory.release(data.slab_base, MIN_SLAB_ORDER + self.slab_order);
        }
        self.statistics = CacheStatistics::default();
    }
}

impl<M: MemoryProvider> Drop for Cache<M> {
    fn drop(&mut self) {
        unsafe {
            self.release_all();
        }
    }
}

#[inline]
fn slab_size_for(slab_order: u32) -> usize {
    1usize << (MIN_SLAB_ORDER + slab_order)
}
