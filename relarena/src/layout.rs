//! In-region data structures.
//!
//! The arena header sits at offset zero and is followed by a sequence of
//! chunks that exactly covers the rest of the region.
//! Both structures are `#[repr(C)]` and contain only integers,
//! so every process sees the same bytes the same way,
//! no matter where it mapped the region.
//!
//! ```text
//! 0                HEADER_SIZE
//! +----------------+-------+---------+-------+---------+-----
//! | ArenaHeader    | Chunk | payload | Chunk | payload | ...
//! +----------------+-------+---------+-------+---------+-----
//!                  |<--- size ------>|
//! ```

use {os_ext::{_SC_PAGESIZE, sysconf}, std::mem::size_of};

/// Alignment of every chunk and every payload.
pub const ALIGN: usize = size_of::<usize>();

/// Page size assumed when sysconf(3) cannot tell.
const FALLBACK_PAGE_SIZE: usize = 4096;

/// Capacity of an arena created with a zero size hint, in pages.
pub const DEFAULT_PAGES: usize = 32;

/// Factor by which an exhausted arena grows.
pub const GROWTH_RATIO: f64 = 1.61;

/// Header at the lowest address of the region.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(C)]
pub struct ArenaHeader
{
    /// Total size of the region in bytes, including this header.
    pub size: usize,

    /// The [`Flags`][`crate::Flags`] bits the arena was created with.
    pub flags: u32,

    /// Address at which the owning process has the region mapped.
    ///
    /// This is compared against the local base address
    /// to detect handles that went stale after a relocation.
    pub base: usize,

    /// Offset of the first free chunk, or zero if there are none.
    pub free: usize,

    /// Backing store handle in the creating process.
    pub handle: i32,
}

/// Header in front of every chunk.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(C)]
pub struct ChunkHeader
{
    /// Size of the chunk in bytes, including this header.
    pub size: usize,

    /// Offset of the chunk's own payload if in use, zero if free.
    pub used: usize,

    /// Offset of the next free chunk, or zero if this is the last one.
    ///
    /// Meaningless for chunks that are in use.
    pub next: usize,
}

/// Size of [`ArenaHeader`].
pub const HEADER_SIZE: usize = size_of::<ArenaHeader>();

/// Size of [`ChunkHeader`].
pub const CHUNK_SIZE: usize = size_of::<ChunkHeader>();

/// Smallest chunk worth splitting off: a header and one aligned byte.
pub const MIN_CHUNK: usize = align_up(CHUNK_SIZE + 1, ALIGN);

// Chunks start right after the header, so it must keep them aligned.
const _: () = assert!(HEADER_SIZE % ALIGN == 0);
const _: () = assert!(CHUNK_SIZE % ALIGN == 0);

impl ChunkHeader
{
    /// Header for a free chunk.
    pub const fn free(size: usize, next: usize) -> Self
    {
        Self{size, used: 0, next}
    }

    /// Whether the chunk is on the free list.
    pub const fn is_free(&self) -> bool
    {
        self.used == 0
    }

    /// Number of payload bytes in the chunk.
    pub const fn usable(&self) -> usize
    {
        self.size - CHUNK_SIZE
    }
}

/// Round up `lhs` to the next multiple of `rhs`, which must be a power of two.
pub const fn align_up(lhs: usize, rhs: usize) -> usize
{
    (lhs + rhs - 1) & !(rhs - 1)
}

/// Like [`align_up`], but returns [`None`] on overflow.
pub fn checked_align_up(lhs: usize, rhs: usize) -> Option<usize>
{
    Some(lhs.checked_add(rhs - 1)? & !(rhs - 1))
}

/// The chunk size needed for a payload of `size` bytes.
pub fn chunk_size_for(size: usize) -> Option<usize>
{
    checked_align_up(size.checked_add(CHUNK_SIZE)?, ALIGN)
}

/// The system page size.
pub fn page_size() -> usize
{
    match sysconf(_SC_PAGESIZE) {
        Ok(Some(size)) if size > 0 => size as usize,
        _ => FALLBACK_PAGE_SIZE,
    }
}

/// The size an arena of `size` bytes grows to so that it spans `target` bytes.
///
/// The size is multiplied by [`GROWTH_RATIO`] until it covers the target,
/// then rounded up to the page size.
/// Returns [`None`] if that would overflow.
pub fn growth_target(size: usize, target: usize, page_size: usize)
    -> Option<usize>
{
    let mut new = size;
    while new < target {
        let next = (new as f64 * GROWTH_RATIO) as usize;
        if next <= new {
            return None;
        }
        new = next;
    }
    checked_align_up(new, page_size)
}
