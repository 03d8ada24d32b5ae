//! The C ABI of the crate. With the `interpose` feature, [`interpose`] also
//! defines `malloc()` and `calloc()` themselves, which forward here along with
//! their return address.

use std::ffi::c_void;

use libc::size_t;

use crate::alloc::{hook::Interposer, map::AllocMap, map::MAP_SIZE, real::PosixMemalign};

#[cfg(feature = "interpose")]
pub mod interpose;

/// The process-wide map, exported as `size_t libafl_alloc_map[16384]`.
#[export_name = "libafl_alloc_map"]
pub static ALLOC_SIZE_MAP: AllocMap = AllocMap::new();

/// Blocks must stay freeable by the platform `free()`/`realloc()`, which the
/// rest of the process keeps calling, so only libc's own heap will do here.
pub static HOOKS: Interposer<'static, PosixMemalign> =
    Interposer::new(&ALLOC_SIZE_MAP, PosixMemalign);

#[cfg(debug_assertions)]
mod nesting {
    use std::{
        cell::Cell,
        sync::atomic::{AtomicUsize, Ordering},
    };

    thread_local! {
        // const and `Drop`-free, so touching it never allocates
        static DEPTH: Cell<usize> = const { Cell::new(0) };
    }

    pub(super) static MAX_DEPTH: AtomicUsize = AtomicUsize::new(0);

    /// Counts how many hook bodies are live on this thread.
    pub(super) struct Nesting(());

    impl Nesting {
        #[inline(always)]
        pub(super) fn enter() -> Self {
            let _ = DEPTH.try_with(|d| {
                d.set(d.get() + 1);
                MAX_DEPTH.fetch_max(d.get(), Ordering::Relaxed);
            });
            Self(())
        }
    }

    impl Drop for Nesting {
        #[inline(always)]
        fn drop(&mut self) {
            let _ = DEPTH.try_with(|d| d.set(d.get() - 1));
        }
    }
}

/// Deepest nesting of `malloc()`/`calloc()` bodies seen on any thread so far.
/// Anything above 1 means a hook re-entered itself.
///
/// Only tracked in debug builds; always 0 in release.
#[cfg(debug_assertions)]
pub fn max_hook_nesting() -> usize {
    nesting::MAX_DEPTH.load(std::sync::atomic::Ordering::Relaxed)
}

#[cfg(not(debug_assertions))]
pub fn max_hook_nesting() -> usize {
    0
}

pub(crate) extern "C" fn malloc_from(size: size_t, ret: *const c_void) -> *mut c_void {
    #[cfg(debug_assertions)]
    let _nesting = nesting::Nesting::enter();
    HOOKS.allocate(size, ret as usize)
}

pub(crate) extern "C" fn calloc_from(
    count: size_t,
    size: size_t,
    ret: *const c_void,
) -> *mut c_void {
    #[cfg(debug_assertions)]
    let _nesting = nesting::Nesting::enter();
    HOOKS.allocate_zeroed(count, size, ret as usize)
}

/// Body of `malloc()`. `ret` is the return address of the `malloc()` call.
#[no_mangle]
pub extern "C" fn allocmap_malloc(size: size_t, ret: *const c_void) -> *mut c_void {
    malloc_from(size, ret)
}

/// Body of `calloc()`. `ret` is the return address of the `calloc()` call.
#[no_mangle]
pub extern "C" fn allocmap_calloc(count: size_t, size: size_t, ret: *const c_void) -> *mut c_void {
    calloc_from(count, size, ret)
}

/// Number of `size_t` slots behind `libafl_alloc_map`.
#[no_mangle]
pub extern "C" fn allocmap_map_len() -> size_t {
    MAP_SIZE
}

/// Zero `libafl_alloc_map`. For harnesses, between runs.
#[no_mangle]
pub extern "C" fn allocmap_map_reset() {
    ALLOC_SIZE_MAP.reset();
}

#[cfg(test)]
mod tests {
    use std::{ptr, slice};

    use super::*;
    use crate::alloc::{map::call_site_index, real::REAL_ALIGN};

    // The global map is shared by every test in the binary (and by the real
    // `malloc()` when built with `interpose`), so only look at slots these
    // tests own.

    #[test]
    fn exported_malloc_records_return_address() {
        let ret = 0x5a5a_5a40 as *const c_void;
        let data = allocmap_malloc(4321, ret);
        assert!(!data.is_null());
        assert_eq!(data as usize % REAL_ALIGN, 0);
        assert!(ALLOC_SIZE_MAP.get_for(ret as usize) >= 4321);
        assert!(ptr::eq(HOOKS.map(), &ALLOC_SIZE_MAP));
        // SAFETY: `posix_memalign()` block
        unsafe { libc::free(data) };
    }

    #[test]
    fn exported_calloc_is_zeroed() {
        let ret = 0x6b6b_6b80 as *const c_void;
        let data = allocmap_calloc(10, 4, ret) as *const u8;
        assert!(!data.is_null());
        // SAFETY: 40 bytes were requested
        let bytes = unsafe { slice::from_raw_parts(data, 40) };
        assert!(bytes.iter().all(|&b| b == 0));
        assert!(ALLOC_SIZE_MAP.get(call_site_index(ret as usize)).unwrap() >= 40);
    }

    #[test]
    fn map_len_is_map_size() {
        assert_eq!(allocmap_map_len(), MAP_SIZE);
        assert_eq!(ALLOC_SIZE_MAP.len(), MAP_SIZE);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn hook_bodies_do_not_nest() {
        for i in 1..64usize {
            allocmap_malloc(i * 17, (i << 6) as *const c_void);
            allocmap_calloc(i, 3, (i << 7) as *const c_void);
        }
        assert_eq!(max_hook_nesting(), 1);
    }
}
