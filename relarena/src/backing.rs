//! Shared memory objects that arenas live in.

use {
    os_ext::{
        MAP_FIXED, MAP_FIXED_NOREPLACE, MAP_PRIVATE, MAP_SHARED,
        MREMAP_MAYMOVE, O_CREAT, O_EXCL, O_RDWR, PROT_READ, PROT_WRITE,
        ftruncate, getpid, memfd_create, mmap, mremap, munmap,
        shm_open, shm_unlink,
    },
    std::{
        io,
        mem::ManuallyDrop,
        os::unix::io::{AsFd, BorrowedFd, OwnedFd},
        ptr::NonNull,
        sync::atomic::{AtomicUsize, Ordering::Relaxed},
    },
};

/// Where to place a new mapping.
#[derive(Clone, Copy, Debug)]
pub enum Placement
{
    /// Let the kernel choose.
    Anywhere,

    /// Exactly at this address, replacing whatever is there.
    Fixed(NonNull<u8>),

    /// Exactly at this address, failing with `EEXIST` if it is taken.
    FixedNoReplace(NonNull<u8>),
}

/// How a mapping may be accessed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Access
{
    /// Read-write; writes are visible to every other shared mapping.
    Shared,

    /// Read-write; writes stay private to this mapping.
    CopyOnWrite,

    /// Read-only.
    ReadOnly,
}

/// An OS-level memory object that can be mapped into processes.
///
/// Implementations only need to say how the object is created;
/// extending and mapping work the same for every file descriptor.
pub trait BackingStore: AsFd + Sized
{
    /// Create a new object of `len` bytes.
    fn create(len: usize) -> io::Result<Self>;

    /// Take ownership of an object created elsewhere,
    /// typically by another process that passed the descriptor on.
    fn from_handle(fd: OwnedFd) -> Self;

    /// Change the length of the object to `len` bytes.
    fn extend(&self, len: usize) -> io::Result<()>
    {
        let len = len.try_into()
            .map_err(|_| io::Error::from_raw_os_error(libc::EFBIG))?;
        ftruncate(self.as_fd(), len)
    }

    /// Map the first `len` bytes of the object.
    ///
    /// # Safety
    ///
    /// With [`Placement::Fixed`], whatever was mapped in the range
    /// is silently replaced; nothing may still be using it.
    unsafe fn map(&self, len: usize, placement: Placement, access: Access)
        -> io::Result<Mapping>
    {
        let prot = match access {
            Access::Shared | Access::CopyOnWrite => PROT_READ | PROT_WRITE,
            Access::ReadOnly                     => PROT_READ,
        };

        let flags = match access {
            Access::Shared                         => MAP_SHARED,
            Access::CopyOnWrite | Access::ReadOnly => MAP_PRIVATE,
        };

        let (addr, flags) = match placement {
            Placement::Anywhere             => (None, flags),
            Placement::Fixed(addr)          => (Some(addr), flags | MAP_FIXED),
            Placement::FixedNoReplace(addr) =>
                (Some(addr), flags | MAP_FIXED_NOREPLACE),
        };

        let ptr = mmap(addr, len, prot, flags, Some(self.as_fd()), 0)?;
        let mapping = Mapping{ptr, len};

        // Kernels before 4.17 treat MAP_FIXED_NOREPLACE as a mere hint.
        if addr.is_some() && addr != Some(ptr) {
            drop(mapping);
            return Err(io::Error::from_raw_os_error(libc::EEXIST));
        }

        Ok(mapping)
    }
}

/// A range of memory mapped by [`BackingStore::map`].
///
/// The range is unmapped when the mapping is dropped.
#[derive(Debug)]
pub struct Mapping
{
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: A mapping is not tied to the thread that created it.
unsafe impl Send for Mapping
{
}

impl Mapping
{
    /// The lowest address of the mapping.
    pub fn as_ptr(&self) -> *mut u8
    {
        self.ptr.as_ptr()
    }

    /// Like [`as_ptr`][`Self::as_ptr`], but as a [`NonNull`].
    pub fn as_non_null(&self) -> NonNull<u8>
    {
        self.ptr
    }

    /// The length of the mapping in bytes.
    pub fn len(&self) -> usize
    {
        self.len
    }

    /// Change the length of the mapping.
    ///
    /// The mapping is first extended where it is.
    /// If that fails and `may_move` is set, it is moved instead.
    ///
    /// # Safety
    ///
    /// If the mapping moves, pointers into it are invalidated.
    pub unsafe fn remap(&mut self, len: usize, may_move: bool)
        -> io::Result<()>
    {
        let ptr = match mremap(self.ptr, self.len, len, 0) {
            Err(err) if may_move && err.raw_os_error() == Some(libc::ENOMEM) =>
                mremap(self.ptr, self.len, len, MREMAP_MAYMOVE)?,
            result => result?,
        };
        self.ptr = ptr;
        self.len = len;
        Ok(())
    }

    /// Unmap the mapping, reporting any error.
    pub fn unmap(self) -> io::Result<()>
    {
        let this = ManuallyDrop::new(self);
        // SAFETY: The mapping is owned and never used again.
        unsafe { munmap(this.ptr, this.len) }
    }
}

impl Drop for Mapping
{
    fn drop(&mut self)
    {
        // SAFETY: The mapping is owned and never used again.
        if let Err(err) = unsafe { munmap(self.ptr, self.len) } {
            log::debug!("Cannot unmap {:p}: {}", self.ptr, err);
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                                   memfd                                    */
/* -------------------------------------------------------------------------- */

/// Anonymous file created with memfd_create(2).
#[derive(Debug)]
pub struct MemfdBacking
{
    fd: OwnedFd,
}

impl BackingStore for MemfdBacking
{
    fn create(len: usize) -> io::Result<Self>
    {
        let this = Self{fd: memfd_create("relarena", 0)?};
        this.extend(len)?;
        Ok(this)
    }

    fn from_handle(fd: OwnedFd) -> Self
    {
        Self{fd}
    }
}

impl AsFd for MemfdBacking
{
    fn as_fd(&self) -> BorrowedFd
    {
        self.fd.as_fd()
    }
}

/* -------------------------------------------------------------------------- */
/*                                    shm                                     */
/* -------------------------------------------------------------------------- */

/// POSIX shared memory object created with shm_open(3).
///
/// The object is unlinked right after it is created,
/// so it is only reachable through its file descriptor
/// and disappears once the last descriptor and mapping are gone.
#[derive(Debug)]
pub struct ShmBacking
{
    fd: OwnedFd,
}

impl BackingStore for ShmBacking
{
    fn create(len: usize) -> io::Result<Self>
    {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let name = format!(
            "/relarena_{}_{}",
            getpid(),
            COUNTER.fetch_add(1, Relaxed),
        );

        let fd = shm_open(&name, O_CREAT | O_EXCL | O_RDWR, 0o600)?;
        shm_unlink(&name)?;

        let this = Self{fd};
        this.extend(len)?;
        Ok(this)
    }

    fn from_handle(fd: OwnedFd) -> Self
    {
        Self{fd}
    }
}

impl AsFd for ShmBacking
{
    fn as_fd(&self) -> BorrowedFd
    {
        self.fd.as_fd()
    }
}
