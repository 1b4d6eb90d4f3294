use {
    super::Arena,
    crate::{
        BackingStore, Error, Offset, Result,
        layout::{CHUNK_SIZE, HEADER_SIZE},
    },
    std::{ops::ControlFlow, ptr::NonNull, slice},
};

/// A live allocation, as yielded by [`Arena::allocations`].
#[derive(Clone, Copy, Debug)]
pub struct Allocation
{
    /// Offset of the payload.
    pub offset: Offset,

    /// Address of the payload in this process.
    pub ptr: NonNull<u8>,

    /// Number of usable payload bytes,
    /// which may exceed the size that was asked for.
    pub size: usize,
}

/// Iterator returned by [`Arena::allocations`].
pub struct Allocations<'a, B: BackingStore>
{
    arena: &'a Arena<B>,
    at: usize,
    end: usize,
}

impl<'a, B: BackingStore> Iterator for Allocations<'a, B>
{
    type Item = Allocation;

    fn next(&mut self) -> Option<Allocation>
    {
        while self.at < self.end {
            let at = self.at;
            let chunk = match self.arena.chunk(at) {
                Ok(chunk) if self.arena.is_sane(at, &chunk) => chunk,
                _ => {
                    log::trace!("Stopping at malformed chunk {:#x}", at);
                    self.at = self.end;
                    return None;
                },
            };

            self.at = at + chunk.size;

            if !chunk.is_free() {
                let offset = Offset::new(at + CHUNK_SIZE);
                let ptr = NonNull::new(self.arena.resolve(offset))?;
                return Some(Allocation{offset, ptr, size: chunk.usable()});
            }
        }
        None
    }
}

impl<B: BackingStore> Arena<B>
{
    /// Walk all live allocations in address order.
    ///
    /// The walk stops early at a malformed chunk;
    /// use [`verify`][`Self::verify`] to find out about those.
    pub fn allocations(&self) -> Allocations<B>
    {
        Allocations{arena: self, at: HEADER_SIZE, end: self.size()}
    }

    /// Call `f` with the address and usable size of every live allocation,
    /// until it returns [`ControlFlow::Break`].
    pub fn visit<F, R>(&self, mut f: F) -> ControlFlow<R>
        where F: FnMut(NonNull<u8>, usize) -> ControlFlow<R>
    {
        self.allocations().try_for_each(|a| f(a.ptr, a.size))
    }

    /// Offsets and sizes of the free chunks, in address order.
    ///
    /// The walk stops early at a malformed free list link;
    /// use [`verify`][`Self::verify`] to find out about those.
    pub fn free_chunks(&self) -> impl Iterator<Item = (Offset, usize)> + '_
    {
        self.free_list()
            .map_while(|node| node.ok())
            .map(|node| (Offset::new(node.at), node.chunk.size))
    }

    /// The payload of the allocation at `ptr`.
    pub fn payload(&self, ptr: Offset) -> Result<&[u8]>
    {
        let (_, chunk) = self.used_chunk(ptr)?;
        // SAFETY: used_chunk checked that the payload is within the arena.
        Ok(unsafe { slice::from_raw_parts(self.resolve(ptr), chunk.usable()) })
    }

    /// The payload of the allocation at `ptr`, for writing.
    ///
    /// This works in any writable mapping,
    /// including copy-on-write attachments at a foreign base address.
    pub fn payload_mut(&mut self, ptr: Offset) -> Result<&mut [u8]>
    {
        if !self.writable {
            return Err(Error::ReadOnly);
        }
        let (_, chunk) = self.used_chunk(ptr)?;
        // SAFETY: See payload.
        Ok(unsafe {
            slice::from_raw_parts_mut(self.resolve(ptr), chunk.usable())
        })
    }

    /// Check every structural invariant of the arena.
    ///
    /// The chunks must exactly cover the arena, occupied chunks must be
    /// tagged with their own payload offset, no two free chunks may be
    /// adjacent, and the free list must hold exactly the free chunks
    /// in address order.
    pub fn verify(&self) -> Result<()>
    {
        let size = self.size();
        if size != self.mapping.len() {
            return Err(Error::Fault);
        }

        let mut free = Vec::new();
        let mut previous_free = false;
        let mut at = HEADER_SIZE;
        while at < size {
            let chunk = self.chunk(at)?;
            if !self.is_sane(at, &chunk) {
                return Err(Error::Fault);
            }

            if chunk.is_free() {
                if previous_free {
                    return Err(Error::Fault);
                }
                free.push((Offset::new(at), chunk.size));
            } else if chunk.used != at + CHUNK_SIZE {
                return Err(Error::Fault);
            }

            previous_free = chunk.is_free();
            at += chunk.size;
        }

        if at != size {
            return Err(Error::Fault);
        }

        let listed = self.free_list()
            .map(|node| node.map(|n| (Offset::new(n.at), n.chunk.size)))
            .collect::<Result<Vec<_>>>()?;
        if listed != free {
            return Err(Error::Fault);
        }

        Ok(())
    }
}
