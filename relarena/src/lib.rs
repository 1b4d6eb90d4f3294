//! Relocatable shared memory arenas.
//!
//! An arena is a single growable region of shared memory
//! with a chunk allocator inside it.
//! The allocator stores nothing but [offsets][`Offset`] in the region,
//! so the same bytes are consistent wherever they are mapped:
//! a controller process can allocate objects in an arena,
//! hand the backing store to a worker process,
//! and the worker can [attach][`Arena::attach`] the arena
//! at any address and follow the same offsets.
//!
//! # Example
//!
//! ```
//! use relarena::{AddressProbe, Arena, Flags};
//!
//! let mut probe = AddressProbe::from_monotonic_clock()?;
//! let mut arena: Arena =
//!     Arena::create(&mut probe, 0, Flags::RESIZE | Flags::DYNAMIC)?;
//!
//! let greeting = arena.alloc(5)?;
//! arena.payload_mut(greeting)?[.. 5].copy_from_slice(b"hello");
//! assert_eq!(&arena.payload(greeting)?[.. 5], b"hello");
//!
//! arena.free(greeting)?;
//! # Ok::<(), relarena::Error>(())
//! ```
//!
//! # Platform support
//!
//! Only Linux is supported,
//! because resizing relies on mremap(2).

#![warn(missing_docs)]

pub use self::{
    arena::*,
    backing::*,
    error::*,
    flags::*,
    offset::*,
    probe::*,
};

pub mod layout;

mod arena;
mod backing;
mod error;
mod flags;
mod offset;
mod probe;
