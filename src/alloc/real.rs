//! Where the interposed hooks actually get their memory from.
//!
//! Anything called from inside `malloc()` must not call `malloc()` again --
//! even `realloc(NULL, n)` loops forever in an optimized build. So the hooks
//! only ever talk to a [`RealAlloc`].

use std::{
    alloc::{GlobalAlloc, Layout},
    ffi::c_void,
    ptr,
};

/// Every block handed out by the hooks is aligned to this.
pub const REAL_ALIGN: usize = 1 << 6;

/// A source of raw memory that cannot recurse into the interposed entry
/// points.
///
/// # Safety
///
/// Implementors must guarantee that `alloc_aligned()`
/// - never calls `malloc()`/`calloc()` (or anything that might), directly or
///   indirectly
/// - never panics or unwinds
/// - returns either null or a pointer to at least `size` writable bytes,
///   aligned to `align`
///
/// `align` is always a power of two that is a multiple of
/// `size_of::<*const ()>()`.
pub unsafe trait RealAlloc {
    fn alloc_aligned(&self, size: usize, align: usize) -> *mut u8;
}

unsafe impl<A> RealAlloc for &A
where
    A: RealAlloc + ?Sized,
{
    fn alloc_aligned(&self, size: usize, align: usize) -> *mut u8 {
        (**self).alloc_aligned(size, align)
    }
}

/// `posix_memalign()` from the platform libc.
///
/// glibc serves this from its internal allocator, without going through the
/// public `malloc` symbol, and the result can still be handed to the platform
/// `free()`. On Windows this is `_aligned_malloc()` instead.
#[derive(Clone, Copy, Debug, Default)]
pub struct PosixMemalign;

#[cfg(unix)]
unsafe impl RealAlloc for PosixMemalign {
    fn alloc_aligned(&self, size: usize, align: usize) -> *mut u8 {
        let mut data: *mut c_void = ptr::null_mut();
        // SAFETY: `data` is a valid out pointer, and `align` is a power of two
        // multiple of the pointer size (trait contract). On failure `data` is
        // left untouched.
        let status = unsafe { libc::posix_memalign(&mut data, align, size) };
        if status != 0 {
            return ptr::null_mut();
        }
        data as *mut u8
    }
}

#[cfg(windows)]
unsafe impl RealAlloc for PosixMemalign {
    fn alloc_aligned(&self, size: usize, align: usize) -> *mut u8 {
        // SAFETY: `align` is a power of two (trait contract).
        unsafe { libc::aligned_malloc(size, align) as *mut u8 }
    }
}

/// dlmalloc, on top of its own `mmap()`-backed segments. Never touches libc's
/// heap at all.
///
/// Blocks from here must not be passed to the platform `free()`, so this can
/// never back the exported `malloc()`: the rest of the process would hand
/// them to libc's `free()`/`realloc()`. It's for private [`Interposer`]s
/// whose blocks stay with their owner.
///
/// [`Interposer`]: crate::alloc::hook::Interposer
#[derive(Clone, Copy, Debug, Default)]
pub struct Dlmalloc;

unsafe impl RealAlloc for Dlmalloc {
    fn alloc_aligned(&self, size: usize, align: usize) -> *mut u8 {
        // `GlobalAlloc::alloc()` is UB for zero-sized layouts
        let Ok(layout) = Layout::from_size_align(size.max(1), align) else {
            return ptr::null_mut();
        };
        // SAFETY:
        // - `layout` has non-zero size
        // - `GlobalDlmalloc` takes its own lock and gets pages from the OS
        //   directly, so this cannot re-enter the hooks
        unsafe { dlmalloc::GlobalDlmalloc.alloc(layout) }
    }
}
