#[cfg(doc)]
use crate::{Log, Store};

/// A receiver of change notifications from a [`Store`].
///
/// Each time a store flushes, every registered listener receives the state as it is now
/// (`next`) and as it was when the coalescing window opened (`prev`). States produced by
/// intermediate mutations within the window are never delivered.
///
/// This trait is implemented for all functions and closures of the form `Fn(&T, &T)`,
/// which is the usual way to write a listener. Implement it directly for a reusable
/// destination type; see [`Log`] for an example.
///
/// # Requirements on implementors
///
/// * A listener may panic; the panic is caught and logged, and the remaining listeners
///   still receive the notification. It is still better not to, since the panic message
///   is the only trace of what went wrong.
///
/// * A listener may read from, subscribe to, or mutate the store which is notifying it.
///   A mutation made during a flush opens a new coalescing window whose notification is
///   delivered after the current flush has reached every listener.
///
/// # Generic parameters
///
/// * `T` is the type of the state.
pub trait Listener<T: ?Sized> {
    /// Process a change from `prev` to `next`.
    fn receive(&self, next: &T, prev: &T);
}

impl<T: ?Sized, F> Listener<T> for F
where
    F: Fn(&T, &T),
{
    fn receive(&self, next: &T, prev: &T) {
        self(next, prev)
    }
}
