use {
    relarena::{AddressProbe, Arena, BackingStore, Error, Flags, MemfdBacking},
    std::{
        os::unix::io::AsFd,
        panic::{AssertUnwindSafe, catch_unwind},
    },
};

/// Run `f` in a forked child and report whether it succeeded.
fn in_child<F>(f: F) -> bool
    where F: FnOnce()
{
    // SAFETY: The child only runs f and then exits immediately.
    match unsafe { libc::fork() } {
        -1 => panic!("fork: {}", std::io::Error::last_os_error()),
        0 => {
            let ok = catch_unwind(AssertUnwindSafe(f)).is_ok();
            // SAFETY: Skips destructors of state shared with the parent.
            unsafe { libc::_exit(if ok { 0 } else { 1 }) }
        },
        pid => {
            let mut status = 0;
            // SAFETY: status is a valid out pointer.
            let result = unsafe { libc::waitpid(pid, &mut status, 0) };
            assert_eq!(result, pid);
            libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0
        },
    }
}

#[test]
fn children_see_the_same_arena()
{
    let mut probe = AddressProbe::from_monotonic_clock().unwrap();
    let flags = Flags::RESIZE | Flags::DYNAMIC;
    let mut arena: Arena = Arena::create(&mut probe, 0, flags).unwrap();

    let message = arena.alloc(12).unwrap();
    arena.payload_mut(message).unwrap()[.. 12].copy_from_slice(b"from parent!");
    let free_before: Vec<_> = arena.free_chunks().collect();
    let base = arena.base();

    // Read-only attachment somewhere else in the child.
    assert!(in_child(|| {
        let fd = arena.as_fd().try_clone_to_owned().unwrap();
        let backing = MemfdBacking::from_handle(fd);
        let mut child = unsafe { Arena::attach(backing, Flags::IMMUTABLE, None) }
            .unwrap();
        assert_eq!(&child.payload(message).unwrap()[.. 12], b"from parent!");
        assert!(matches!(child.alloc(8), Err(Error::InvalidHandle)));
        assert!(matches!(child.payload_mut(message), Err(Error::ReadOnly)));
    }));

    // Identity attachment in the child, replacing the inherited mapping.
    assert!(in_child(|| {
        let fd = arena.as_fd().try_clone_to_owned().unwrap();
        let backing = MemfdBacking::from_handle(fd);
        let mut child = unsafe { Arena::attach(backing, Flags::IDENTITY, None) }
            .unwrap();
        assert_eq!(child.base(), base);
        assert_eq!(&child.payload(message).unwrap()[.. 12], b"from parent!");

        // The copy-on-write mapping lets the child allocate privately.
        let reply = child.alloc(100).unwrap();
        child.payload_mut(reply).unwrap().fill(1);
        child.free(message).unwrap();
        child.verify().unwrap();
    }));

    // Identity attachment at the base the parent is using.
    assert!(in_child(|| {
        let fd = arena.as_fd().try_clone_to_owned().unwrap();
        let backing = MemfdBacking::from_handle(fd);
        let mut child =
            unsafe { Arena::attach(backing, Flags::IDENTITY, Some(base)) }
                .unwrap();
        assert_eq!(child.base(), base);
        assert_eq!(&child.payload(message).unwrap()[.. 12], b"from parent!");
        child.grow(message, 64).unwrap();
        child.verify().unwrap();
    }));

    // Nothing the children did is visible here.
    assert_eq!(arena.free_chunks().collect::<Vec<_>>(), free_before);
    assert_eq!(&arena.payload(message).unwrap()[.. 12], b"from parent!");
    arena.verify().unwrap();
}
