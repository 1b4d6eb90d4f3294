//! The arena and its lifecycle.

pub use self::iter::*;

use {
    crate::{
        AddressProbe, BackingStore, Error, Flags, MemfdBacking, Offset, Result,
        backing::{Access, Mapping, Placement},
        layout::{
            ALIGN, ArenaHeader, CHUNK_SIZE, ChunkHeader, DEFAULT_PAGES,
            HEADER_SIZE, checked_align_up, page_size,
        },
    },
    os_ext::{FD_CLOEXEC, fcntl_getfd, fcntl_setfd},
    std::{
        os::unix::io::{AsFd, AsRawFd, BorrowedFd},
        ptr::{NonNull, copy_nonoverlapping},
    },
};

mod alloc;
mod iter;
mod resize;

/// Number of fixed-address mapping attempts before giving up.
const MAP_RETRIES: usize = 3;

/// Number of candidate addresses drawn before giving up.
const MAX_DRAWS: usize = 64;

/// A region of shared memory with a chunk allocator inside.
///
/// Everything the allocator stores in the region is an [`Offset`],
/// so the region may be mapped at different addresses by different
/// processes, or move within one process, and remain consistent.
///
/// An arena is not internally synchronized.
/// Within one process, mutation requires `&mut self`.
/// Processes that share an arena must coordinate among themselves.
pub struct Arena<B: BackingStore = MemfdBacking>
{
    mapping: Mapping,
    backing: B,
    writable: bool,
}

impl<B: BackingStore> Arena<B>
{
    /// Create a new arena of at least `capacity` bytes.
    ///
    /// The capacity is rounded up to the page size;
    /// zero stands for a default of 32 pages.
    /// The arena is mapped shared at an address drawn from `probe`.
    pub fn create(probe: &mut AddressProbe, capacity: usize, flags: Flags)
        -> Result<Self>
    {
        let page_size = page_size();
        let size = match checked_align_up(capacity, page_size) {
            None    => return Err(Error::OutOfMemory),
            Some(0) => DEFAULT_PAGES * page_size,
            Some(n) => n,
        };

        let backing = B::create(size)?;
        let mapping = Self::reserve(probe, &backing, size)?;
        let mut this = Self{mapping, backing, writable: true};

        let header = ArenaHeader{
            size,
            flags: flags.persistent().bits(),
            base: this.base_addr(),
            free: HEADER_SIZE,
            handle: this.backing.as_fd().as_raw_fd(),
        };
        this.set_header(header);
        this.set_chunk(HEADER_SIZE, ChunkHeader::free(size - HEADER_SIZE, 0));

        log::debug!("Created arena of {} bytes at {:p}", size, this.base());
        Ok(this)
    }

    /// Map `len` bytes of `backing` at an unused address in the window.
    fn reserve(probe: &mut AddressProbe, backing: &B, len: usize)
        -> Result<Mapping>
    {
        let mut tries = 0;

        for _ in 0 .. MAX_DRAWS {
            if tries == MAP_RETRIES {
                break;
            }

            let addr = match probe.candidate(len) {
                Some(addr) if AddressProbe::is_unmapped(addr, len) => addr,
                _ => continue,
            };

            let placement = match NonNull::new(addr as *mut u8) {
                Some(ptr) => Placement::FixedNoReplace(ptr),
                None      => continue,
            };

            // SAFETY: FixedNoReplace never replaces existing mappings.
            match unsafe { backing.map(len, placement, Access::Shared) } {
                Ok(mapping) if AddressProbe::in_window(
                    mapping.as_ptr() as usize, len) => {
                    return Ok(mapping);
                },
                Ok(mapping) => {
                    drop(mapping);
                    tries += 1;
                },
                Err(err) if err.raw_os_error() == Some(libc::EEXIST) => {
                    log::trace!("Address {:#x} was taken", addr);
                    tries += 1;
                },
                Err(err) => return Err(err.into()),
            }
        }

        log::debug!("No free address for an arena of {} bytes", len);
        Err(Error::OutOfMemory)
    }

    /// Map an existing arena into this process.
    ///
    /// The arena is mapped privately: writes are never seen by
    /// other processes, and with [`IMMUTABLE`] they are refused.
    /// With [`IDENTITY`] the arena is mapped at `base`,
    /// or at the address recorded in its header if `base` is [`None`].
    /// Otherwise it is mapped wherever the kernel likes,
    /// which lets the arena be read but not allocated from.
    ///
    /// # Safety
    ///
    /// `backing` must hold an arena created by [`create`][`Self::create`].
    /// With [`IDENTITY`], whatever is mapped at the target address
    /// is replaced; nothing may still be using it.
    ///
    /// [`IMMUTABLE`]: `Flags::IMMUTABLE`
    /// [`IDENTITY`]: `Flags::IDENTITY`
    pub unsafe fn attach(backing: B, flags: Flags, base: Option<NonNull<u8>>)
        -> Result<Self>
    {
        let header = {
            let probe = backing.map(HEADER_SIZE, Placement::Anywhere,
                                    Access::ReadOnly)?;
            let header = probe.as_ptr().cast::<ArenaHeader>().read();
            probe.unmap()?;
            header
        };

        if header.size < HEADER_SIZE + CHUNK_SIZE || header.size % ALIGN != 0 {
            return Err(Error::InvalidHandle);
        }

        let placement = if flags.contains(Flags::IDENTITY) {
            let base = base.or_else(|| NonNull::new(header.base as *mut u8))
                .ok_or(Error::InvalidHandle)?;
            Placement::Fixed(base)
        } else {
            Placement::Anywhere
        };

        let immutable = flags.contains(Flags::IMMUTABLE);
        let access = if immutable { Access::ReadOnly } else { Access::CopyOnWrite };

        let mapping = backing.map(header.size, placement, access)?;
        let this = Self{mapping, backing, writable: !immutable};

        log::debug!("Attached arena of {} bytes at {:p}", header.size,
                    this.base());
        Ok(this)
    }

    /// Create a new arena with the same contents as this one.
    ///
    /// The copy has its own backing store
    /// and its own base address drawn from `probe`.
    pub fn copy(&self, probe: &mut AddressProbe, flags: Flags)
        -> Result<Self>
    {
        let size = self.size();
        let mut copy = Self::create(probe, size, flags)?;

        let len = size.min(self.mapping.len()).min(copy.mapping.len())
            - HEADER_SIZE;

        // SAFETY: Both ranges are within their mappings,
        //         which are distinct.
        unsafe {
            copy_nonoverlapping(
                self.mapping.as_ptr().add(HEADER_SIZE),
                copy.mapping.as_ptr().add(HEADER_SIZE),
                len,
            );
        }

        let header = ArenaHeader{free: self.header().free, ..copy.header()};
        copy.set_header(header);

        log::debug!("Copied arena at {:p} to {:p}", self.base(), copy.base());
        Ok(copy)
    }

    /// Unmap the arena from this process and close its handle.
    ///
    /// Other processes that have the arena mapped are unaffected.
    /// Dropping the arena does the same, but ignores errors.
    pub fn terminate(self) -> Result<()>
    {
        let Self{mapping, backing, ..} = self;
        log::debug!("Terminating arena at {:p}", mapping.as_ptr());
        mapping.unmap()?;
        drop(backing);
        Ok(())
    }

    /// Total size of the arena in bytes, including the header.
    pub fn size(&self) -> usize
    {
        self.header().size
    }

    /// The flags stored in the arena header.
    pub fn flags(&self) -> Flags
    {
        Flags::from_bits_truncate(self.header().flags)
    }

    /// Where the arena is mapped in this process.
    ///
    /// This changes when the arena is relocated.
    pub fn base(&self) -> NonNull<u8>
    {
        self.mapping.as_non_null()
    }

    /// The backing store of the arena.
    pub fn backing(&self) -> &B
    {
        &self.backing
    }

    /// Whether child processes inherit the handle across execve(2).
    ///
    /// Handles are created close-on-exec.
    /// Make the handle inheritable before spawning a child
    /// that is going to [`attach`][`Self::attach`] the arena.
    pub fn set_inheritable(&self, inheritable: bool) -> Result<()>
    {
        let fd = self.backing.as_fd();
        let flags = fcntl_getfd(fd)?;
        let flags = if inheritable { flags & !FD_CLOEXEC }
                    else { flags | FD_CLOEXEC };
        fcntl_setfd(fd, flags)?;
        Ok(())
    }

    /// The address of `offset` in this process.
    ///
    /// No checks are performed;
    /// the address is invalidated by any call that can resize the arena.
    pub fn resolve(&self, offset: Offset) -> *mut u8
    {
        self.mapping.as_ptr().wrapping_add(offset.get())
    }

    /// Fail unless this process may change the arena structure.
    fn check_mutable(&self) -> Result<()>
    {
        if self.header().base != self.base_addr() {
            return Err(Error::InvalidHandle);
        }
        if !self.writable {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }

    fn base_addr(&self) -> usize
    {
        self.mapping.as_ptr() as usize
    }

    fn header(&self) -> ArenaHeader
    {
        // SAFETY: Every mapping is at least HEADER_SIZE bytes
        //         and page-aligned.
        unsafe { self.mapping.as_ptr().cast::<ArenaHeader>().read() }
    }

    fn set_header(&mut self, header: ArenaHeader)
    {
        debug_assert!(self.writable);
        // SAFETY: See header.
        unsafe { self.mapping.as_ptr().cast::<ArenaHeader>().write(header) }
    }

    /// Read the chunk header at `at`.
    fn chunk(&self, at: usize) -> Result<ChunkHeader>
    {
        let in_bounds = at >= HEADER_SIZE
            && at % ALIGN == 0
            && at.checked_add(CHUNK_SIZE)
                 .map_or(false, |end| end <= self.mapping.len());

        if !in_bounds {
            return Err(Error::Fault);
        }

        // SAFETY: Checked that the header is in bounds and aligned.
        Ok(unsafe { self.mapping.as_ptr().add(at).cast::<ChunkHeader>().read() })
    }

    fn set_chunk(&mut self, at: usize, chunk: ChunkHeader)
    {
        debug_assert!(self.writable);
        debug_assert!(at >= HEADER_SIZE && at % ALIGN == 0);
        debug_assert!(at + CHUNK_SIZE <= self.mapping.len());
        // SAFETY: Callers only write chunks they have read before,
        //         or chunks within a chunk they have read before.
        unsafe { self.mapping.as_ptr().add(at).cast::<ChunkHeader>().write(chunk) }
    }

    /// Whether the chunk at `at` fits inside the arena.
    fn is_sane(&self, at: usize, chunk: &ChunkHeader) -> bool
    {
        chunk.size >= CHUNK_SIZE
            && chunk.size % ALIGN == 0
            && at.checked_add(chunk.size)
                 .map_or(false, |end| end <= self.mapping.len())
    }

    /// The offset stored in a free list link.
    fn link(&self, link: Link) -> Result<usize>
    {
        match link {
            Link::Head      => Ok(self.header().free),
            Link::Chunk(at) => Ok(self.chunk(at)?.next),
        }
    }

    fn set_link(&mut self, link: Link, to: usize) -> Result<()>
    {
        match link {
            Link::Head => {
                let header = ArenaHeader{free: to, ..self.header()};
                self.set_header(header);
            },
            Link::Chunk(at) => {
                let chunk = self.chunk(at)?;
                self.set_chunk(at, ChunkHeader{next: to, ..chunk});
            },
        }
        Ok(())
    }

    /// Walk the free list in address order.
    fn free_list(&self) -> FreeList<B>
    {
        FreeList{arena: self, link: Link::Head, floor: 0, done: false}
    }
}

impl<B: BackingStore> AsFd for Arena<B>
{
    fn as_fd(&self) -> BorrowedFd
    {
        self.backing.as_fd()
    }
}

/* -------------------------------------------------------------------------- */
/*                                 Free list                                  */
/* -------------------------------------------------------------------------- */

/// Something that points at a free chunk.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Link
{
    /// The free list head in the arena header.
    Head,

    /// The `next` field of the free chunk at this offset.
    Chunk(usize),
}

/// A free chunk together with the link that points at it.
#[derive(Clone, Copy, Debug)]
struct FreeNode
{
    link: Link,
    at: usize,
    chunk: ChunkHeader,
}

/// Iterator returned by [`Arena::free_list`].
///
/// Yields [`Error::Fault`] and stops if the list is malformed.
/// Offsets must strictly increase, so the walk always terminates.
struct FreeList<'a, B: BackingStore>
{
    arena: &'a Arena<B>,
    link: Link,
    floor: usize,
    done: bool,
}

impl<'a, B: BackingStore> FreeList<'a, B>
{
    fn step(&mut self) -> Result<Option<FreeNode>>
    {
        let at = self.arena.link(self.link)?;
        if at == 0 {
            return Ok(None);
        }

        if at <= self.floor {
            return Err(Error::Fault);
        }

        let chunk = self.arena.chunk(at)?;
        if !chunk.is_free() || !self.arena.is_sane(at, &chunk) {
            return Err(Error::Fault);
        }

        let node = FreeNode{link: self.link, at, chunk};
        self.link = Link::Chunk(at);
        self.floor = at;
        Ok(Some(node))
    }
}

impl<'a, B: BackingStore> Iterator for FreeList<'a, B>
{
    type Item = Result<FreeNode>;

    fn next(&mut self) -> Option<Self::Item>
    {
        if self.done {
            return None;
        }
        let result = self.step().transpose();
        self.done = !matches!(result, Some(Ok(_)));
        result
    }
}
