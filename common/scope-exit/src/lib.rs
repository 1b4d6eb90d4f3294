//! Ad-hoc scope guards.
//!
//! Guards are mostly used to undo a half-finished operation on error paths.
//! The guard is created right after the step that needs undoing,
//! and dismissed once the whole operation has succeeded.

#![warn(missing_docs)]

use std::mem::ManuallyDrop;

/// Run a closure when dropped, unless dismissed.
#[must_use = "the closure runs immediately if the guard is not bound"]
pub struct ScopeExit<F>
    where F: FnOnce()
{
    f: ManuallyDrop<F>,
}

impl<F> ScopeExit<F>
    where F: FnOnce()
{
    /// Create a guard that calls `f` when it is dropped.
    pub fn new(f: F) -> Self
    {
        Self{f: ManuallyDrop::new(f)}
    }

    /// Drop the guard without calling the closure.
    ///
    /// Unlike [`std::mem::forget`], this still drops
    /// whatever the closure captured by value.
    pub fn dismiss(self)
    {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: this.f is not used again and this is never dropped.
        unsafe { ManuallyDrop::drop(&mut this.f); }
    }
}

impl<F> Drop for ScopeExit<F>
    where F: FnOnce()
{
    fn drop(&mut self)
    {
        // SAFETY: self.f will not be used anymore.
        let f = unsafe { ManuallyDrop::take(&mut self.f) };
        f();
    }
}

/// Define an ad-hoc scope guard.
///
/// The code passed to this macro is performed at the end of the scope.
/// It is performed when the scope ends or when a panic passes through.
/// Use [`ScopeExit::new`] directly if the guard must be dismissable.
///
/// # Examples
///
/// ```
/// # use scope_exit::scope_exit;
/// use std::cell::Cell;
/// let x = Cell::new(0);
/// {
///     scope_exit! { x.set(1); }
///     x.set(2);
/// }
/// assert_eq!(x.get(), 1);
/// ```
#[macro_export]
macro_rules! scope_exit
{
    { $($tt:tt)* } => {
        let __scope_exit = $crate::ScopeExit::new(|| { $($tt)* });
    };
}

#[cfg(test)]
mod tests
{
    use {super::*, std::{cell::Cell, rc::Rc}};

    #[test]
    fn runs_on_drop()
    {
        let ran = Cell::new(false);
        drop(ScopeExit::new(|| ran.set(true)));
        assert!(ran.get());
    }

    #[test]
    fn dismiss_skips_closure_but_drops_captures()
    {
        let ran = Rc::new(Cell::new(false));
        let witness = Rc::clone(&ran);

        let guard = ScopeExit::new(move || ran.set(true));
        guard.dismiss();

        assert!(!witness.get());
        assert_eq!(Rc::strong_count(&witness), 1);
    }
}
