use {
    super::{Arena, FreeNode, Link},
    crate::{
        BackingStore, Error, Flags, Offset, Result,
        layout::{
            ALIGN, CHUNK_SIZE, ChunkHeader, HEADER_SIZE, MIN_CHUNK,
            chunk_size_for, growth_target, page_size,
        },
    },
    std::{cmp::Ordering, ptr::copy_nonoverlapping},
};

/// The chunk size that serves a request for `size` payload bytes.
fn request_size(size: usize) -> Result<usize>
{
    let request = chunk_size_for(size).ok_or(Error::OutOfMemory)?;
    Ok(request.max(MIN_CHUNK))
}

impl<B: BackingStore> Arena<B>
{
    /// Allocate `size` bytes and return the offset of the payload.
    ///
    /// The smallest free chunk that fits is used.
    /// If none fits and the arena has [`RESIZE`], the arena grows
    /// by [`GROWTH_RATIO`] until the request fits, which may move it.
    ///
    /// [`RESIZE`]: `Flags::RESIZE`
    /// [`GROWTH_RATIO`]: `crate::layout::GROWTH_RATIO`
    pub fn alloc(&mut self, size: usize) -> Result<Offset>
    {
        self.check_mutable()?;
        let request = request_size(size)?;

        let mut best: Option<FreeNode> = None;
        let mut last: Option<FreeNode> = None;
        for node in self.free_list() {
            let node = node?;
            let fits = node.chunk.size >= request;
            if fits && best.map_or(true, |b| node.chunk.size < b.chunk.size) {
                best = Some(node);
            }
            last = Some(node);
            if node.chunk.size == request {
                break;
            }
        }

        let node = match best {
            Some(node) => node,
            None if self.flags().contains(Flags::RESIZE) =>
                self.expand(last, request)?,
            None => return Err(Error::OutOfMemory),
        };

        self.take(node, request)
    }

    /// Hand out the first `request` bytes of a free chunk.
    fn take(&mut self, node: FreeNode, request: usize) -> Result<Offset>
    {
        let FreeNode{link, at, chunk} = node;
        let size = self.carve(link, at, chunk.size, request, chunk.next)?;
        let payload = at + CHUNK_SIZE;
        self.set_chunk(at, ChunkHeader{size, used: payload, next: 0});
        log::trace!("Allocated {} bytes at {:#x}", size, at);
        Ok(Offset::new(payload))
    }

    /// Unlink `total` bytes at `at` from the free list,
    /// returning all but the first `request` bytes if that is worth it.
    ///
    /// `link` points at the free chunk being consumed,
    /// `next` is that chunk's successor in the free list.
    /// Returns the size of the chunk that remains at `at`.
    fn carve(
        &mut self,
        link:    Link,
        at:      usize,
        total:   usize,
        request: usize,
        next:    usize,
    ) -> Result<usize>
    {
        let rest = total - request;
        if rest >= MIN_CHUNK {
            let split = at + request;
            self.set_chunk(split, ChunkHeader::free(rest, next));
            self.set_link(link, split)?;
            Ok(request)
        } else {
            self.set_link(link, next)?;
            Ok(total)
        }
    }

    /// Grow the arena so that a free chunk of `request` bytes
    /// exists at its end, and return that chunk.
    ///
    /// `last` is the last node of the free list.
    /// If it ends where the arena ends, it is enlarged;
    /// otherwise a new free chunk is appended after it.
    fn expand(&mut self, last: Option<FreeNode>, request: usize)
        -> Result<FreeNode>
    {
        let old = self.size();
        let trailing = last.filter(|n| n.at + n.chunk.size == old);
        let have = trailing.map_or(0, |n| n.chunk.size);

        let target = (request - have).checked_add(CHUNK_SIZE)
            .and_then(|shortfall| old.checked_add(shortfall))
            .ok_or(Error::OutOfMemory)?;
        let new = growth_target(old, target, page_size())
            .ok_or(Error::OutOfMemory)?;

        self.resize(new)?;

        // The arena may have moved; only offsets are used from here on.
        let node = match trailing {
            Some(node) => {
                let size = node.chunk.size + (new - old);
                FreeNode{chunk: ChunkHeader{size, ..node.chunk}, ..node}
            },
            None => {
                let link = last.map_or(Link::Head, |n| Link::Chunk(n.at));
                let chunk = ChunkHeader::free(new - old, 0);
                self.set_link(link, old)?;
                FreeNode{link, at: old, chunk}
            },
        };
        self.set_chunk(node.at, node.chunk);

        Ok(node)
    }

    /// Find the occupied chunk whose payload is at `ptr`.
    pub(super) fn used_chunk(&self, ptr: Offset) -> Result<(usize, ChunkHeader)>
    {
        let ptr = ptr.get();
        if ptr < HEADER_SIZE + CHUNK_SIZE
            || ptr >= self.size()
            || ptr % ALIGN != 0 {
            return Err(Error::Fault);
        }

        let at = ptr - CHUNK_SIZE;
        let chunk = self.chunk(at)?;
        if chunk.used != ptr || !self.is_sane(at, &chunk) {
            return Err(Error::Fault);
        }

        Ok((at, chunk))
    }

    /// Find the free list node for the free chunk at `at`.
    fn find_free(&self, at: usize) -> Result<FreeNode>
    {
        for node in self.free_list() {
            let node = node?;
            if node.at == at {
                return Ok(node);
            }
            if node.at > at {
                break;
            }
        }
        Err(Error::Fault)
    }

    /// Return an allocation to the free list.
    ///
    /// The chunk is merged with free chunks directly before and after it.
    /// Freeing [`Offset::NULL`] does nothing.
    pub fn free(&mut self, ptr: Offset) -> Result<()>
    {
        self.check_mutable()?;
        if !self.flags().contains(Flags::DYNAMIC) {
            return Err(Error::Unsupported);
        }
        if ptr.is_null() {
            return Ok(());
        }

        let (at, chunk) = self.used_chunk(ptr)?;

        let mut prev: Option<FreeNode> = None;
        let mut succ: Option<FreeNode> = None;
        for node in self.free_list() {
            let node = node?;
            if node.at > at {
                succ = Some(node);
                break;
            }
            prev = Some(node);
        }

        let mut start = at;
        let mut end = at + chunk.size;
        let mut link = prev.map_or(Link::Head, |p| Link::Chunk(p.at));
        let mut next = succ.map_or(0, |s| s.at);

        if let Some(p) = prev {
            match (p.at + p.chunk.size).cmp(&at) {
                Ordering::Greater => return Err(Error::Fault),
                Ordering::Equal   => { start = p.at; link = p.link; },
                Ordering::Less    => (),
            }
        }

        if let Some(s) = succ {
            if s.at < end {
                return Err(Error::Fault);
            }
            if s.at == end {
                end += s.chunk.size;
                next = s.chunk.next;
            }
        }

        // Clear the tag, so the offset no longer validates.
        self.set_chunk(at, ChunkHeader::free(chunk.size, 0));
        self.set_chunk(start, ChunkHeader::free(end - start, next));
        self.set_link(link, start)?;

        log::trace!("Freed {} bytes at {:#x}", chunk.size, at);
        Ok(())
    }

    /// Grow an allocation to `size` bytes without moving it.
    ///
    /// This works only if the chunk directly after the allocation is free
    /// and large enough, or ends the arena and the arena may grow.
    /// The arena itself may move, but the offset stays the same.
    pub fn grow(&mut self, ptr: Offset, size: usize) -> Result<()>
    {
        self.check_mutable()?;
        let request = request_size(size)?;
        let (at, chunk) = self.used_chunk(ptr)?;

        if chunk.size >= request {
            return Ok(());
        }

        let need = request - chunk.size;
        let next_at = at + chunk.size;
        let end = self.size();

        let node = if next_at == end {
            None
        } else if self.chunk(next_at)?.is_free() {
            Some(self.find_free(next_at)?)
        } else {
            return Err(Error::OutOfMemory);
        };

        let node = match node {
            Some(node) if node.chunk.size >= need => node,
            _ => {
                let reaches_end = node.map_or(true,
                    |n| n.at + n.chunk.size == end);
                if !reaches_end || !self.flags().contains(Flags::RESIZE) {
                    return Err(Error::OutOfMemory);
                }
                let last = match node {
                    Some(node) => Some(node),
                    None => self.free_list().last().transpose()?,
                };
                self.expand(last, need)?
            },
        };

        let FreeNode{link, chunk: next, ..} = node;
        let total = chunk.size + next.size;
        let size = self.carve(link, at, total, request, next.next)?;
        self.set_chunk(at, ChunkHeader{size, ..chunk});

        log::trace!("Grew chunk at {:#x} to {} bytes", at, size);
        Ok(())
    }

    /// Resize an allocation, moving it if it cannot grow in place.
    ///
    /// Reallocating [`Offset::NULL`] allocates.
    /// Without [`DYNAMIC`] the allocation is never moved,
    /// because the old one could not be freed.
    ///
    /// [`DYNAMIC`]: `Flags::DYNAMIC`
    pub fn realloc(&mut self, ptr: Offset, size: usize) -> Result<Offset>
    {
        if ptr.is_null() {
            return self.alloc(size);
        }

        match self.grow(ptr, size) {
            Ok(()) => Ok(ptr),
            Err(Error::OutOfMemory) if self.flags().contains(Flags::DYNAMIC) => {
                let (_, old) = self.used_chunk(ptr)?;
                let moved = self.alloc(size)?;
                let (_, new) = self.used_chunk(moved)?;

                // SAFETY: Both payloads are live and distinct.
                unsafe {
                    copy_nonoverlapping(
                        self.resolve(ptr),
                        self.resolve(moved),
                        old.usable().min(new.usable()),
                    );
                }

                self.free(ptr)?;
                Ok(moved)
            },
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::AddressProbe,
        proptest::{collection::vec as pvec, prop_oneof, proptest, strategy::Strategy},
    };

    fn arena(flags: Flags) -> Arena
    {
        let mut probe = AddressProbe::from_monotonic_clock().unwrap();
        Arena::create(&mut probe, 0, flags).unwrap()
    }

    fn free_chunks(arena: &Arena) -> Vec<(usize, usize)>
    {
        arena.free_chunks().map(|(at, size)| (at.get(), size)).collect()
    }

    #[test]
    fn zero_byte_allocations_are_distinct()
    {
        let mut arena = arena(Flags::empty());
        let a = arena.alloc(0).unwrap();
        let b = arena.alloc(0).unwrap();
        assert_ne!(a, b);
        assert!(arena.payload(a).unwrap().len() >= 1);
        arena.verify().unwrap();
    }

    #[test]
    fn exact_fit_takes_whole_chunk()
    {
        let mut arena = arena(Flags::DYNAMIC);
        let a = arena.alloc(64).unwrap();
        let _b = arena.alloc(64).unwrap();
        arena.free(a).unwrap();

        let before = free_chunks(&arena);
        let c = arena.alloc(64).unwrap();
        assert_eq!(c, a);
        assert_eq!(free_chunks(&arena), before[1 ..]);
        arena.verify().unwrap();
    }

    #[test]
    fn small_remainder_is_not_split_off()
    {
        let mut arena = arena(Flags::DYNAMIC);
        let a = arena.alloc(64).unwrap();
        let _b = arena.alloc(64).unwrap();
        arena.free(a).unwrap();

        // Fits in the hole, but leaves too little for another chunk.
        let c = arena.alloc(64 - ALIGN).unwrap();
        assert_eq!(c, a);
        assert_eq!(arena.payload(c).unwrap().len(), 64);
        arena.verify().unwrap();
    }

    #[test]
    fn best_fit_prefers_smallest_hole()
    {
        let mut arena = arena(Flags::DYNAMIC);
        let big = arena.alloc(256).unwrap();
        let _x = arena.alloc(8).unwrap();
        let small = arena.alloc(64).unwrap();
        let _y = arena.alloc(8).unwrap();
        arena.free(big).unwrap();
        arena.free(small).unwrap();

        assert_eq!(arena.alloc(48).unwrap(), small);
        arena.verify().unwrap();
    }

    #[test]
    fn oversized_requests_fail()
    {
        let mut arena = arena(Flags::RESIZE);
        let size = arena.size();
        assert!(matches!(arena.alloc(usize::MAX), Err(Error::OutOfMemory)));
        assert!(arena.alloc(usize::MAX / 2).is_err());
        assert_eq!(arena.size(), size);
        arena.verify().unwrap();
    }

    #[test]
    fn exhaustion_without_resize()
    {
        let mut arena = arena(Flags::empty());
        let size = arena.size();
        assert!(matches!(arena.alloc(size), Err(Error::OutOfMemory)));
        assert_eq!(arena.size(), size);
        arena.verify().unwrap();
    }

    #[test]
    fn growth_when_free_list_is_empty()
    {
        let mut arena = arena(Flags::RESIZE | Flags::MAYMOVE);
        let size = arena.size();
        let all = arena.alloc(size - HEADER_SIZE - CHUNK_SIZE).unwrap();
        assert_eq!(arena.free_chunks().count(), 0);

        let more = arena.alloc(100).unwrap();
        assert!(more > all);
        assert!(arena.size() > size);
        arena.verify().unwrap();
    }

    #[test]
    fn invalid_offsets_are_faults()
    {
        let mut arena = arena(Flags::DYNAMIC);
        let a = arena.alloc(64).unwrap();

        for bad in [a + 1, a + ALIGN, Offset::new(HEADER_SIZE),
                    Offset::new(arena.size()), Offset::new(usize::MAX - 7)] {
            assert!(matches!(arena.free(bad), Err(Error::Fault)));
            assert!(matches!(arena.grow(bad, 100), Err(Error::Fault)));
            assert!(matches!(arena.realloc(bad, 100), Err(Error::Fault)));
        }

        arena.free(a).unwrap();
        assert!(matches!(arena.free(a), Err(Error::Fault)));
        arena.verify().unwrap();
    }

    #[test]
    fn free_null_is_noop()
    {
        let mut arena = arena(Flags::DYNAMIC);
        let before = free_chunks(&arena);
        arena.free(Offset::NULL).unwrap();
        assert_eq!(free_chunks(&arena), before);
    }

    #[test]
    fn grow_into_used_neighbour_fails()
    {
        let mut arena = arena(Flags::RESIZE | Flags::DYNAMIC);
        let a = arena.alloc(64).unwrap();
        let _b = arena.alloc(64).unwrap();
        assert!(matches!(arena.grow(a, 128), Err(Error::OutOfMemory)));
        arena.grow(a, 32).unwrap();
        arena.verify().unwrap();
    }

    #[test]
    fn grow_absorbs_free_neighbour()
    {
        let mut arena = arena(Flags::DYNAMIC);
        let a = arena.alloc(64).unwrap();
        let b = arena.alloc(64).unwrap();
        let _c = arena.alloc(64).unwrap();
        arena.free(b).unwrap();

        // The whole neighbour fits, with too little slack to split.
        arena.grow(a, 64 + CHUNK_SIZE + 64).unwrap();
        assert_eq!(arena.payload(a).unwrap().len(), 64 + CHUNK_SIZE + 64);
        assert_eq!(arena.free_chunks().count(), 1);
        arena.verify().unwrap();
    }

    #[test]
    fn grow_at_end_expands_arena()
    {
        let mut arena = arena(Flags::RESIZE | Flags::MAYMOVE);
        let size = arena.size();
        let a = arena.alloc(size - HEADER_SIZE - CHUNK_SIZE).unwrap();
        arena.payload_mut(a).unwrap()[0] = 42;

        arena.grow(a, size).unwrap();
        assert!(arena.size() > size);
        assert!(arena.payload(a).unwrap().len() >= size);
        assert_eq!(arena.payload(a).unwrap()[0], 42);
        arena.verify().unwrap();
    }

    #[test]
    fn realloc_without_dynamic_does_not_move()
    {
        let mut arena = arena(Flags::empty());
        let a = arena.alloc(64).unwrap();
        let _b = arena.alloc(64).unwrap();
        assert!(matches!(arena.realloc(a, 128), Err(Error::OutOfMemory)));
        assert_eq!(arena.realloc(Offset::NULL, 8).unwrap().get() % ALIGN, 0);
    }

    #[derive(Clone, Debug)]
    enum Op
    {
        Alloc(usize),
        Free(usize),
        Grow(usize, usize),
        Realloc(usize, usize),
    }

    fn op() -> impl Strategy<Value = Op>
    {
        prop_oneof![
            (0usize .. 3000).prop_map(Op::Alloc),
            (0usize .. 64).prop_map(Op::Free),
            (0usize .. 64, 0usize .. 6000).prop_map(|(i, n)| Op::Grow(i, n)),
            (0usize .. 64, 0usize .. 6000).prop_map(|(i, n)| Op::Realloc(i, n)),
        ]
    }

    /// Check that every live allocation still holds its fill byte.
    fn check_contents(arena: &Arena, live: &[(Offset, usize, u8)])
    {
        for &(ptr, len, fill) in live {
            let payload = arena.payload(ptr).unwrap();
            assert!(payload.len() >= len);
            assert!(payload[.. len].iter().all(|&b| b == fill));
        }
    }

    proptest!
    {
        #[test]
        fn random_operations_keep_invariants(ops in pvec(op(), 1 .. 100))
        {
            let flags = Flags::RESIZE | Flags::DYNAMIC | Flags::MAYMOVE;
            let mut probe = AddressProbe::from_monotonic_clock().unwrap();
            let mut arena: Arena = Arena::create(&mut probe, 4096, flags)
                .unwrap();

            let mut live: Vec<(Offset, usize, u8)> = Vec::new();
            for (i, op) in ops.into_iter().enumerate() {
                let fill = i as u8;
                match op {
                    Op::Alloc(n) => {
                        let ptr = arena.alloc(n).unwrap();
                        arena.payload_mut(ptr).unwrap()[.. n].fill(fill);
                        live.push((ptr, n, fill));
                    },
                    Op::Free(_) if live.is_empty() => (),
                    Op::Free(i) => {
                        let (ptr, _, _) = live.swap_remove(i % live.len());
                        arena.free(ptr).unwrap();
                    },
                    Op::Grow(_, _) | Op::Realloc(_, _) if live.is_empty() => (),
                    Op::Grow(i, n) => {
                        let i = i % live.len();
                        let (ptr, len, _) = live[i];
                        match arena.grow(ptr, n) {
                            Ok(()) => {
                                let len = len.max(n);
                                arena.payload_mut(ptr).unwrap()[.. len]
                                    .fill(fill);
                                live[i] = (ptr, len, fill);
                            },
                            Err(Error::OutOfMemory) => (),
                            Err(err) => panic!("Unexpected error: {}", err),
                        }
                    },
                    Op::Realloc(i, n) => {
                        let i = i % live.len();
                        let (ptr, len, old_fill) = live[i];
                        let moved = arena.realloc(ptr, n).unwrap();
                        let kept = len.min(n);
                        let payload = arena.payload_mut(moved).unwrap();
                        assert!(payload[.. kept].iter().all(|&b| b == old_fill));
                        payload[.. n].fill(fill);
                        live[i] = (moved, n, fill);
                    },
                }
                arena.verify().unwrap();
                check_contents(&arena, &live);
            }
        }
    }
}
