/// Supplies and releases aligned backing regions for a [`Cache`](crate::Cache).
///
/// A provider is expected to be infallible in the sense the core relies on:
/// if it cannot supply a region, the core aborts rather than propagate an
/// error, so implementations should themselves abort or panic rather than
/// return a null pointer, unless they specifically want to exercise the
/// core's own `acquire`-failed diagnostic.
pub trait MemoryProvider {
    /// Returns a pointer to a region of exactly `2^log2_size` bytes, aligned
    /// to `2^log2_size`. Content is uninitialized.
    ///
    /// # Safety
    /// The returned region must be aligned as described and must not alias
    /// any other region returned by this provider until it is passed back to
    /// [`release`](MemoryProvider::release).
    unsafe fn acquire(&mut self, log2_size: u32) -> *mut u8;

    /// Releases a region previously returned by `acquire(log2_size)`.
    ///
    /// # Safety
    /// `base` must be a pointer previously returned by this provider's
    /// `acquire` with the same `log2_size`, and not already released.
    unsafe fn release(&mut self, base: *mut u8, log2_size: u32);
}

#[cfg(feature = "std")]
mod system {
    use super::MemoryProvider;
    use std::alloc::{alloc, dealloc, Layout};

    /// A [`MemoryProvider`] backed by the process's global allocator.
    ///
    /// Convenience for callers who don't need a custom provider (e.g. one
    /// backed by a buddy allocator); not part of the allocator's core
    /// contract.
    #[derive(Debug, Default)]
    pub struct SystemMemoryProvider;

    impl MemoryProvider for SystemMemoryProvider {
        unsafe fn acquire(&mut self, log2_size: u32) -> *mut u8 {
            let size = 1usize << log2_size;
            let layout = Layout::from_size_align(size, size).expect("invalid slab layout");
            alloc(layout)
        }

        unsafe fn release(&mut self, base: *mut u8, log2_size: u32) {
            let size = 1usize << log2_size;
            let layout = Layout::from_size_align(size, size).expect("invalid slab layout");
            dealloc(base, layout);
        }
    }
}

#[cfg(feature = "std")]
pub use system::SystemMemoryProvider;
