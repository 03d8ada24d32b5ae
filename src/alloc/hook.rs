use std::{ffi::c_void, ptr};

use super::{
    map::AllocMap,
    real::{RealAlloc, REAL_ALIGN},
};

/// The bodies of the `malloc()`/`calloc()` replacements: record the request
/// in an [`AllocMap`], then get memory from a [`RealAlloc`].
///
/// Nothing in here allocates, locks or panics, so this is safe to call from
/// inside the process allocator. The caller provides the call site (the
/// return address of whoever called `malloc()`), since only the outermost
/// frame can know it.
pub struct Interposer<'m, A> {
    map: &'m AllocMap,
    real: A,
}

impl<'m, A> Interposer<'m, A>
where
    A: RealAlloc,
{
    pub const fn new(map: &'m AllocMap, real: A) -> Self {
        Self { map, real }
    }

    pub const fn map(&self) -> &'m AllocMap {
        self.map
    }

    /// `malloc(size)`, called from `call_site`. Returns null if the backing
    /// allocator couldn't do it, uninitialized memory otherwise.
    #[inline]
    pub fn allocate(&self, size: usize, call_site: usize) -> *mut c_void {
        self.map.observe(call_site, size);
        self.real.alloc_aligned(size, REAL_ALIGN) as *mut c_void
    }

    /// `calloc(count, size)`, called from `call_site`.
    ///
    /// `count * size` wraps on overflow, the same as the `calloc()` this
    /// stands in for when it doesn't check.
    #[inline]
    pub fn allocate_zeroed(&self, count: usize, size: usize, call_site: usize) -> *mut c_void {
        let total = count.wrapping_mul(size);
        let data = self.allocate(total, call_site);
        if !data.is_null() {
            // SAFETY: `RealAlloc` guarantees at least `total` writable bytes
            // behind any non-null result.
            unsafe { ptr::write_bytes(data as *mut u8, 0, total) };
        }
        data
    }
}
