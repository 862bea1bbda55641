//! A symmetric two-party link over shared state.
//!
//! A [`Bond`] pairs two endpoints (a future with its promise) so that either
//! party can reach their common state after moves. The endpoints share a
//! heap cell: moving an endpoint moves nothing but a reference, so the link
//! stays consistent without any pointer fix-up, and dropping an endpoint
//! simply releases its reference.

use crate::util::assertion_failed;
use std::rc::Rc;

/// One endpoint of a two-party link carrying shared state `S`.
pub struct Bond<S> {
    cell: Option<Rc<S>>,
}

impl<S> Bond<S> {
    /// A fresh, unlinked endpoint.
    pub fn unlinked() -> Self {
        Bond { cell: None }
    }

    /// Link two endpoints over `state`.
    ///
    /// Fatal if either endpoint is already linked.
    #[track_caller]
    pub fn bind(a: &mut Bond<S>, b: &mut Bond<S>, state: S) {
        if a.is_linked() || b.is_linked() {
            assertion_failed("attempt to bind an endpoint that is already bound");
        }
        let cell = Rc::new(state);
        a.cell = Some(cell.clone());
        b.cell = Some(cell);
    }

    /// True while this endpoint is linked.
    pub fn is_linked(&self) -> bool {
        self.cell.is_some()
    }

    /// The shared state, or `None` when unlinked.
    pub fn get(&self) -> Option<&Rc<S>> {
        self.cell.as_ref()
    }

    /// Sever this endpoint, releasing its reference to the shared state.
    pub fn unbind(&mut self) {
        self.cell = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_links_both_endpoints_to_the_same_state() {
        let mut a = Bond::unlinked();
        let mut b = Bond::unlinked();
        assert!(!a.is_linked());

        Bond::bind(&mut a, &mut b, 42usize);

        assert!(a.is_linked() && b.is_linked());
        assert!(Rc::ptr_eq(a.get().unwrap(), b.get().unwrap()));
    }

    #[test]
    fn the_link_survives_moves() {
        let mut a = Bond::unlinked();
        let mut b = Bond::unlinked();
        Bond::bind(&mut a, &mut b, String::from("payload"));

        // Move both endpoints somewhere else entirely.
        let boxed_a = Box::new(a);
        let mut stash = vec![b];
        let moved_b = stash.pop().unwrap();

        assert!(Rc::ptr_eq(boxed_a.get().unwrap(), moved_b.get().unwrap()));
        assert_eq!(**moved_b.get().unwrap(), "payload");
    }

    #[test]
    fn dropping_one_endpoint_leaves_the_other_usable() {
        let mut a = Bond::unlinked();
        let mut b = Bond::unlinked();
        Bond::bind(&mut a, &mut b, 7u8);

        drop(a);

        assert!(b.is_linked());
        assert_eq!(Rc::strong_count(b.get().unwrap()), 1);

        b.unbind();
        assert!(!b.is_linked());
    }
}
