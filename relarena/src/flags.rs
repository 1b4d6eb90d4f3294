use bitflags::bitflags;

bitflags!
{
    /// Behaviour of an arena.
    ///
    /// The flags given to [`create`] are stored in the arena header,
    /// so every process that attaches the arena sees the same policy.
    /// [`IMMUTABLE`] and [`IDENTITY`] only affect [`attach`]
    /// and are never stored.
    ///
    /// [`create`]: `crate::Arena::create`
    /// [`attach`]: `crate::Arena::attach`
    /// [`IMMUTABLE`]: `Flags::IMMUTABLE`
    /// [`IDENTITY`]: `Flags::IDENTITY`
    pub struct Flags: u32
    {
        /// The mapping may move to another base address when resizing.
        const MAYMOVE   = 1 << 0;

        /// The backing store may grow when the arena is exhausted.
        const RESIZE    = 1 << 1;

        /// Allocations may be freed and their memory reused.
        const DYNAMIC   = 1 << 2;

        /// Attach read-only instead of copy-on-write.
        const IMMUTABLE = 1 << 3;

        /// Attach at the same base address as the creating process.
        const IDENTITY  = 1 << 4;
    }
}

impl Flags
{
    /// The flags that are meaningful in the arena header.
    pub(crate) fn persistent(self) -> Self
    {
        self & (Self::MAYMOVE | Self::RESIZE | Self::DYNAMIC)
    }
}
