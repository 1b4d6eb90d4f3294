use std::{fmt, ops::{Add, Sub}};

/// Region-relative reference.
///
/// An offset is a byte distance from the base of an arena.
/// Offsets are stored inside the arena instead of addresses,
/// so the arena remains valid wherever it is mapped:
/// two processes that map the same arena at different base addresses
/// resolve the same offset to their own correct local address.
///
/// Offsets stay valid across operations that relocate the arena;
/// addresses obtained from [`Arena::resolve`] do not.
///
/// [`Arena::resolve`]: `crate::Arena::resolve`
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct Offset(usize);

impl Offset
{
    /// The null offset.
    ///
    /// No allocation ever lives at offset zero; the arena header does.
    pub const NULL: Self = Self(0);

    /// Create an offset from a byte distance.
    pub const fn new(offset: usize) -> Self
    {
        Self(offset)
    }

    /// The byte distance from the arena base.
    pub const fn get(self) -> usize
    {
        self.0
    }

    /// Whether this is the null offset.
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }
}

impl Add<usize> for Offset
{
    type Output = Self;

    fn add(self, rhs: usize) -> Self
    {
        Self(self.0 + rhs)
    }
}

impl Sub<usize> for Offset
{
    type Output = Self;

    fn sub(self, rhs: usize) -> Self
    {
        Self(self.0 - rhs)
    }
}

impl From<Offset> for usize
{
    fn from(offset: Offset) -> Self
    {
        offset.0
    }
}

impl fmt::Display for Offset
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "0x{:08x}", self.0)
    }
}
