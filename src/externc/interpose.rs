//! `malloc()` and `calloc()` themselves.
//!
//! Rust can't read its own return address, so these are naked trampolines:
//! they copy the return address into the next argument register and tail-jump
//! into the Rust body. The body then returns straight to the original caller.
//! Being `#[no_mangle]` Rust functions, they are exported from the `cdylib`
//! (for `LD_PRELOAD`) as well as from any binary linking the `rlib`.

use std::{arch::naked_asm, ffi::c_void};

use libc::size_t;

use super::{calloc_from, malloc_from};

#[cfg(not(all(unix, any(target_arch = "x86_64", target_arch = "aarch64"))))]
compile_error!("`interpose` supports x86_64 and aarch64 unix targets only");

/// # Safety
/// See man pages
#[cfg(all(unix, target_arch = "x86_64"))]
#[unsafe(naked)]
#[no_mangle]
pub unsafe extern "C" fn malloc(size: size_t) -> *mut c_void {
    // size in rdi, return address at [rsp] -> ret in rsi
    naked_asm!(
        "mov rsi, [rsp]",
        "jmp {body}",
        body = sym malloc_from,
    )
}

/// # Safety
/// See man pages
#[cfg(all(unix, target_arch = "x86_64"))]
#[unsafe(naked)]
#[no_mangle]
pub unsafe extern "C" fn calloc(count: size_t, size: size_t) -> *mut c_void {
    // count in rdi, size in rsi -> ret in rdx
    naked_asm!(
        "mov rdx, [rsp]",
        "jmp {body}",
        body = sym calloc_from,
    )
}

/// # Safety
/// See man pages
#[cfg(all(unix, target_arch = "aarch64"))]
#[unsafe(naked)]
#[no_mangle]
pub unsafe extern "C" fn malloc(size: size_t) -> *mut c_void {
    // size in x0, return address in lr -> ret in x1
    naked_asm!(
        "mov x1, x30",
        "b {body}",
        body = sym malloc_from,
    )
}

/// # Safety
/// See man pages
#[cfg(all(unix, target_arch = "aarch64"))]
#[unsafe(naked)]
#[no_mangle]
pub unsafe extern "C" fn calloc(count: size_t, size: size_t) -> *mut c_void {
    // count in x0, size in x1 -> ret in x2
    naked_asm!(
        "mov x2, x30",
        "b {body}",
        body = sym calloc_from,
    )
}
