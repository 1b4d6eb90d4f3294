//! Extra items for talking to the operating system.
//!
//! This crate provides a safe, low-level interface to the operating system.
//! The functions in this crate are named after their underlying system calls,
//! and their behavior is identical except for the differences listed below.
//! The exact semantics of each function can be found in their man pages.
//! This is in contrast with the std crate, which gives no such guarantees.
//! This is a trade-off against cross-platform compatibility.
//!
//! # Differences with underlying system calls
//!
//! Errors are reported using [`Result`] rather than
//! through `errno` and an arbitrary return value.
//!
//! Regular string arguments are accepted instead of NUL-terminated strings.
//! They are automatically made NUL-terminated by the wrapper functions.
//! If an interior NUL is found within the string,
//! the wrapper function fails with `EINVAL`.
//!
//! When a new file descriptor is created by one of the functions,
//! it is created with the `FD_CLOEXEC` bit set (atomically).
//! That is, the `*_CLOEXEC` flag is set implicitly by the wrapper functions.
//! Use [`fcntl_setfd`] to make a descriptor inheritable on purpose.
//!
//! If the system call fails with `EINTR` (interrupted),
//! the wrapper function automatically retries it.
//!
//! Functions that create, move, or destroy memory mappings are unsafe,
//! because they can invalidate memory the program is still using.
//!
//! [`Result`]: `std::io::Result`

#![warn(missing_docs)]

pub use {
    self::{fcntl::*, sys_mman::*, time::*, unistd::*},
    libc::{
        CLOCK_MONOTONIC,
        FD_CLOEXEC,
        MAP_ANONYMOUS, MAP_FIXED, MAP_FIXED_NOREPLACE, MAP_PRIVATE,
        MAP_SHARED,
        MREMAP_MAYMOVE,
        O_CREAT, O_EXCL, O_RDWR,
        PROT_NONE, PROT_READ, PROT_WRITE,
        _SC_PAGESIZE,
        clockid_t, off_t, pid_t, timespec,
    },
};

use std::io::{self, ErrorKind::Interrupted};

pub mod cstr;

mod fcntl;
mod sys_mman;
mod time;
mod unistd;

/// Call `f` until it no longer fails with `EINTR`.
fn retry_on_eintr<F, T>(mut f: F) -> io::Result<T>
    where F: FnMut() -> io::Result<T>
{
    loop {
        match f() {
            Err(err) if err.kind() == Interrupted => continue,
            result                                => return result,
        }
    }
}
