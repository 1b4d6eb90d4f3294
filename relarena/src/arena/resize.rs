use {
    super::Arena,
    crate::{BackingStore, Error, Flags, Result, layout::ArenaHeader},
    scope_exit::ScopeExit,
};

impl<B: BackingStore> Arena<B>
{
    /// Grow the arena to `new` bytes.
    ///
    /// The mapping is extended in place if possible.
    /// Otherwise, with [`MAYMOVE`], it moves to a new base address,
    /// invalidating every address previously derived from the arena.
    /// On failure the arena and its backing store are left as they were.
    ///
    /// [`MAYMOVE`]: `Flags::MAYMOVE`
    pub(super) fn resize(&mut self, new: usize) -> Result<()>
    {
        let old = self.size();
        let old_base = self.base_addr();
        let may_move = self.flags().contains(Flags::MAYMOVE);

        if let Err(err) = self.backing.extend(new) {
            log::debug!("Cannot extend backing store to {} bytes: {}",
                        new, err);
            return Err(Error::OutOfMemory);
        }

        let backing = &self.backing;
        let rollback = ScopeExit::new(|| {
            if let Err(err) = backing.extend(old) {
                log::debug!("Cannot shrink backing store back: {}", err);
            }
        });

        // SAFETY: Callers only keep offsets across resizes.
        match unsafe { self.mapping.remap(new, may_move) } {
            Ok(()) => rollback.dismiss(),
            Err(err) if err.raw_os_error() == Some(libc::ENOMEM) => {
                log::debug!("Cannot grow arena at {:#x} to {} bytes",
                            old_base, new);
                return Err(Error::OutOfMemory);
            },
            Err(err) => return Err(err.into()),
        }

        let base = self.base_addr();
        let header = ArenaHeader{size: new, base, ..self.header()};
        self.set_header(header);

        if base == old_base {
            log::debug!("Grew arena at {:#x} from {} to {} bytes",
                        base, old, new);
        } else {
            log::debug!("Moved arena from {:#x} to {:#x}, {} to {} bytes",
                        old_base, base, old, new);
        }

        Ok(())
    }
}
