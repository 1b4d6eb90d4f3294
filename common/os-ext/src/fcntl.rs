use {
    crate::retry_on_eintr,
    std::{io, os::unix::io::{AsRawFd, BorrowedFd}},
};

/// Call fcntl(2) with `F_GETFD`.
pub fn fcntl_getfd(fd: BorrowedFd) -> io::Result<libc::c_int>
{
    retry_on_eintr(|| {
        // SAFETY: F_GETFD takes no further arguments.
        let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFD) };

        if flags == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(flags)
    })
}

/// Call fcntl(2) with `F_SETFD` and the given flags.
///
/// This is the only way in this crate to clear `FD_CLOEXEC`,
/// which is needed to let a child process inherit a descriptor.
pub fn fcntl_setfd(fd: BorrowedFd, flags: libc::c_int) -> io::Result<()>
{
    retry_on_eintr(|| {
        // SAFETY: F_SETFD takes an int argument.
        let result = unsafe {
            libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, flags)
        };

        if result == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    })
}
