use {
    crate::{clockid_t, timespec},
    std::{io, mem::MaybeUninit},
};

/// Call clock_gettime(2) with the given clock.
pub fn clock_gettime(clockid: clockid_t) -> io::Result<timespec>
{
    let mut tp = MaybeUninit::uninit();

    // SAFETY: tp is large enough to hold a timespec.
    let result = unsafe { libc::clock_gettime(clockid, tp.as_mut_ptr()) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: clock_gettime initialized tp.
    Ok(unsafe { tp.assume_init() })
}
