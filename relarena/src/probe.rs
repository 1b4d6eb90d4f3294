//! Choosing base addresses for new arenas.
//!
//! Arenas are mapped at fixed addresses drawn from a window
//! high in the address space, far away from where the kernel
//! places mappings on its own.
//! This makes it likely that a child process can later map the arena
//! at the same address, which lets it use [`IDENTITY`] attachment.
//!
//! [`IDENTITY`]: `crate::Flags::IDENTITY`

use {
    crate::layout::page_size,
    os_ext::{CLOCK_MONOTONIC, clock_gettime, msync},
    std::io,
};

#[cfg(target_pointer_width = "64")]
mod window
{
    pub const BASE: usize = 1 << 45;
    // Linux does not hand out addresses above 47 bits.
    pub const MAX:  usize = 0x7f00_0000_0000;
    pub const STEP: usize = 1 << 24;
}

#[cfg(target_pointer_width = "32")]
mod window
{
    pub const BASE: usize = 1 << 29;
    pub const MAX:  usize = 0xf000_0000;
    pub const STEP: usize = 1 << 16;
}

/// Generator of candidate base addresses.
///
/// Each process should create one probe at startup
/// and pass it to every [`Arena::create`] call.
///
/// [`Arena::create`]: `crate::Arena::create`
#[derive(Clone, Debug)]
pub struct AddressProbe
{
    seed: u32,
}

impl AddressProbe
{
    /// Create a probe with the given seed.
    ///
    /// Only the low 32 bits of the seed are used.
    pub fn new(seed: u64) -> Self
    {
        Self{seed: seed as u32}
    }

    /// Create a probe seeded from the monotonic clock.
    pub fn from_monotonic_clock() -> io::Result<Self>
    {
        let now = clock_gettime(CLOCK_MONOTONIC)?;
        let nanos = (now.tv_sec as u64)
            .wrapping_mul(1_000_000_000)
            .wrapping_add(now.tv_nsec as u64);
        Ok(Self::new(nanos))
    }

    /// Draw a candidate base address for a region of `len` bytes.
    ///
    /// Returns [`None`] if the drawn address leaves no room
    /// for the region before the end of the window.
    pub fn candidate(&mut self, len: usize) -> Option<usize>
    {
        let slots = (window::MAX - window::BASE) / window::STEP;
        let slot = self.next() as usize % slots;
        let base = window::BASE + slot * window::STEP;
        Self::in_window(base, len).then(|| base)
    }

    /// Whether a region at `addr` of `len` bytes lies within the window.
    pub fn in_window(addr: usize, len: usize) -> bool
    {
        addr >= window::BASE
            && addr.checked_add(len).map_or(false, |end| end <= window::MAX)
    }

    /// Whether no page of the given range is mapped in this process.
    pub fn is_unmapped(addr: usize, len: usize) -> bool
    {
        let page_size = page_size();
        (addr .. addr.saturating_add(len))
            .step_by(page_size)
            .all(|page| {
                match msync(page as *mut u8, page_size, 0) {
                    Err(err) => err.raw_os_error() == Some(libc::ENOMEM),
                    Ok(())   => false,
                }
            })
    }

    /// Advance the generator, exactly like glibc's rand_r(3).
    fn next(&mut self) -> u32
    {
        let mut next = self.seed;
        let mut step = || {
            next = next.wrapping_mul(1103515245).wrapping_add(12345);
            next / 65536
        };

        let mut result = step() % 2048;
        result = (result << 10) ^ (step() % 1024);
        result = (result << 10) ^ (step() % 1024);

        self.seed = next;
        result
    }
}
