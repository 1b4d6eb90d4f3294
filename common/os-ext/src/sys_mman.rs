use {
    crate::{cstr::IntoCStr, off_t, retry_on_eintr},
    std::{
        ffi::CStr,
        io,
        os::unix::io::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd},
        ptr::{NonNull, null_mut},
    },
};

/// Call memfd_create(2) with the given arguments.
pub fn memfd_create<'a>(name: impl IntoCStr<'a>, flags: libc::c_uint)
    -> io::Result<OwnedFd>
{
    #[inline(never)]
    fn monomorphic(name: &CStr, flags: libc::c_uint) -> io::Result<OwnedFd>
    {
        let flags = flags | libc::MFD_CLOEXEC;

        // SAFETY: name is NUL-terminated.
        let fd = unsafe { libc::memfd_create(name.as_ptr(), flags) };

        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: fd is a new, open file descriptor.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    let name = name.into_cstr()?;
    monomorphic(&name, flags)
}

/// Call shm_open(3) with the given arguments.
pub fn shm_open<'a>(
    name:  impl IntoCStr<'a>,
    oflag: libc::c_int,
    mode:  libc::mode_t,
) -> io::Result<OwnedFd>
{
    let name = name.into_cstr()?;
    let oflag = oflag | libc::O_CLOEXEC;

    retry_on_eintr(|| {
        // SAFETY: name is NUL-terminated.
        let fd = unsafe { libc::shm_open(name.as_ptr(), oflag, mode) };

        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: fd is a new, open file descriptor.
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    })
}

/// Call shm_unlink(3) with the given arguments.
pub fn shm_unlink<'a>(name: impl IntoCStr<'a>) -> io::Result<()>
{
    let name = name.into_cstr()?;

    // SAFETY: name is NUL-terminated.
    let result = unsafe { libc::shm_unlink(name.as_ptr()) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Call mmap(2) with the given arguments.
///
/// If `addr` is [`None`], a null hint is passed.
/// If `fd` is [`None`], -1 is passed.
///
/// # Safety
///
/// With `MAP_FIXED`, any existing mapping in the range is replaced.
/// The caller must ensure nothing in the program still uses that memory.
pub unsafe fn mmap(
    addr:   Option<NonNull<u8>>,
    length: usize,
    prot:   libc::c_int,
    flags:  libc::c_int,
    fd:     Option<BorrowedFd>,
    offset: off_t,
) -> io::Result<NonNull<u8>>
{
    let addr = addr.map_or(null_mut(), |a| a.as_ptr().cast());
    let fd = fd.map(|fd| fd.as_raw_fd()).unwrap_or(-1);

    let ptr = libc::mmap(addr, length, prot, flags, fd, offset);

    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    // mmap(2) never returns null without MAP_FIXED at address zero.
    NonNull::new(ptr.cast())
        .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))
}

/// Call mremap(2) with the given arguments.
///
/// Only the three-argument form is supported;
/// `MREMAP_FIXED` is not.
///
/// # Safety
///
/// `old_address` and `old_size` must describe a mapping
/// created by [`mmap`] or [`mremap`].
/// With `MREMAP_MAYMOVE`, pointers into the old mapping are invalidated.
pub unsafe fn mremap(
    old_address: NonNull<u8>,
    old_size:    usize,
    new_size:    usize,
    flags:       libc::c_int,
) -> io::Result<NonNull<u8>>
{
    let ptr = libc::mremap(old_address.as_ptr().cast(), old_size, new_size,
                           flags);

    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }

    NonNull::new(ptr.cast())
        .ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))
}

/// Call munmap(2) with the given arguments.
///
/// # Safety
///
/// Nothing in the program may use the unmapped memory afterwards.
pub unsafe fn munmap(addr: NonNull<u8>, length: usize) -> io::Result<()>
{
    let result = libc::munmap(addr.as_ptr().cast(), length);

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Call msync(2) with the given arguments.
///
/// msync(2) fails with `ENOMEM` if any page in the range is unmapped,
/// so it doubles as a way to ask whether an address range is in use.
/// The memory is never read or written through `addr`.
pub fn msync(addr: *mut u8, length: usize, flags: libc::c_int)
    -> io::Result<()>
{
    // MS_INVALIDATE could discard modifications made through other mappings.
    let flags = flags & !libc::MS_INVALIDATE;

    // SAFETY: The kernel validates the range; nothing is dereferenced.
    let result = unsafe { libc::msync(addr.cast(), length, flags) };

    if result == -1 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::{
            MAP_SHARED, MREMAP_MAYMOVE, O_CREAT, O_EXCL, O_RDWR,
            PROT_READ, PROT_WRITE,
            ftruncate, getpid,
        },
        std::os::unix::io::AsFd,
    };

    const LEN: usize = 4096;

    #[test]
    fn shared_mappings_see_each_other()
    {
        let fd = memfd_create("os-ext-test", 0).unwrap();
        ftruncate(fd.as_fd(), LEN as off_t).unwrap();

        unsafe {
            let a = mmap(None, LEN, PROT_READ | PROT_WRITE, MAP_SHARED,
                         Some(fd.as_fd()), 0).unwrap();
            let b = mmap(None, LEN, PROT_READ | PROT_WRITE, MAP_SHARED,
                         Some(fd.as_fd()), 0).unwrap();
            assert_ne!(a, b);

            a.as_ptr().add(100).write(42);
            assert_eq!(b.as_ptr().add(100).read(), 42);

            munmap(a, LEN).unwrap();
            munmap(b, LEN).unwrap();
        }
    }

    #[test]
    fn msync_reports_unmapped_pages()
    {
        let fd = memfd_create("os-ext-test", 0).unwrap();
        ftruncate(fd.as_fd(), LEN as off_t).unwrap();

        unsafe {
            let a = mmap(None, LEN, PROT_READ, MAP_SHARED,
                         Some(fd.as_fd()), 0).unwrap();
            msync(a.as_ptr(), LEN, 0).unwrap();
            munmap(a, LEN).unwrap();

            let err = msync(a.as_ptr(), LEN, 0).unwrap_err();
            assert_eq!(err.raw_os_error(), Some(libc::ENOMEM));
        }
    }

    #[test]
    fn mremap_preserves_contents()
    {
        let fd = memfd_create("os-ext-test", 0).unwrap();
        ftruncate(fd.as_fd(), 4 * LEN as off_t).unwrap();

        unsafe {
            let a = mmap(None, LEN, PROT_READ | PROT_WRITE, MAP_SHARED,
                         Some(fd.as_fd()), 0).unwrap();
            a.as_ptr().write(7);

            let b = mremap(a, LEN, 4 * LEN, MREMAP_MAYMOVE).unwrap();
            assert_eq!(b.as_ptr().read(), 7);
            b.as_ptr().add(3 * LEN).write(9);

            munmap(b, 4 * LEN).unwrap();
        }
    }

    #[test]
    fn shm_objects_can_be_unlinked_while_open()
    {
        let name = format!("/os-ext-test-{}", getpid());
        let fd = shm_open(&name, O_CREAT | O_EXCL | O_RDWR, 0o600).unwrap();
        shm_unlink(&name).unwrap();
        ftruncate(fd.as_fd(), LEN as off_t).unwrap();

        let err = shm_unlink(&name).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }
}
