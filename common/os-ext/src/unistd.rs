use {
    crate::{off_t, pid_t, retry_on_eintr},
    std::{io, os::unix::io::{AsRawFd, BorrowedFd}},
};

/// Call ftruncate(2) with the given arguments.
pub fn ftruncate(fd: BorrowedFd, length: off_t) -> io::Result<()>
{
    retry_on_eintr(|| {
        // SAFETY: This is always safe.
        let result = unsafe { libc::ftruncate(fd.as_raw_fd(), length) };

        if result == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    })
}

/// Call getpid(2).
pub fn getpid() -> pid_t
{
    // SAFETY: This is always safe.
    unsafe { libc::getpid() }
}

/// Call sysconf(3) with the given argument.
///
/// sysconf(3) returns -1 without setting `errno` for limits
/// that are indeterminate; this is reported as [`None`].
pub fn sysconf(name: libc::c_int) -> io::Result<Option<libc::c_long>>
{
    // SAFETY: errno is thread-local, so clearing it is fine.
    unsafe { *libc::__errno_location() = 0; }

    // SAFETY: This is always safe.
    let value = unsafe { libc::sysconf(name) };

    if value == -1 {
        let err = io::Error::last_os_error();
        return match err.raw_os_error() {
            Some(0) => Ok(None),
            _       => Err(err),
        };
    }

    Ok(Some(value))
}
