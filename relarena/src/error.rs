//! Errors returned by arena operations.

use {crate::Offset, std::io, thiserror::Error};

/// Result of an arena operation.
pub type Result<T> =
    std::result::Result<T, Error>;

/// Error returned by an arena operation.
///
/// Every variant corresponds to an `errno` value,
/// see [`errno`][`Self::errno`].
/// Operations that fail leave the arena structurally valid,
/// except during [`create`][`crate::Arena::create`],
/// where failure means no arena was created at all.
#[derive(Debug, Error)]
pub enum Error
{
    /// The arena handle is stale or does not refer to an arena.
    ///
    /// This happens when the base address recorded in the arena header
    /// differs from where this process has the arena mapped.
    #[error("Arena handle is stale or invalid")]
    InvalidHandle,

    /// The offset does not address a live allocation.
    #[error("Offset does not address a live allocation")]
    Fault,

    /// No chunk fits and the arena could not grow.
    #[error("Out of arena memory")]
    OutOfMemory,

    /// The arena does not reclaim memory.
    #[error("Arena was not created with DYNAMIC")]
    Unsupported,

    /// The arena is mapped read-only in this process.
    #[error("Arena is mapped read-only")]
    ReadOnly,

    #[allow(missing_docs)]
    #[error("{0}")]
    Os(#[from] io::Error),
}

impl Error
{
    /// The `errno` value corresponding to this error.
    pub fn errno(&self) -> i32
    {
        match self {
            Self::InvalidHandle => libc::EINVAL,
            Self::Fault         => libc::EFAULT,
            Self::OutOfMemory   => libc::ENOMEM,
            Self::Unsupported   => libc::ENOTSUP,
            Self::ReadOnly      => libc::EROFS,
            Self::Os(err)       => err.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    /// The negated `errno` value, for callers that speak in status codes.
    pub fn status(&self) -> isize
    {
        -(self.errno() as isize)
    }
}

/// Collapse an allocation result into a single status code.
///
/// Offsets are always positive, so they cannot be confused with errors.
pub fn status(result: &Result<Offset>) -> isize
{
    match result {
        Ok(offset) => offset.get() as isize,
        Err(err)   => err.status(),
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn status_codes_are_negated_errno()
    {
        assert_eq!(Error::OutOfMemory.status(), -(libc::ENOMEM as isize));
        assert_eq!(Error::Unsupported.status(), -(libc::ENOTSUP as isize));

        let os = Error::from(io::Error::from_raw_os_error(libc::EMFILE));
        assert_eq!(os.errno(), libc::EMFILE);
    }

    #[test]
    fn status_passes_offsets_through()
    {
        assert_eq!(status(&Ok(Offset::new(64))), 64);
        assert_eq!(status(&Err(Error::Fault)), -(libc::EFAULT as isize));
    }
}
