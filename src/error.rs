use thiserror::Error;

#[cfg(doc)]
use crate::Store;

/// Error returned when a [`Store`] is used after [`Store::destroy()`].
///
/// Reads, subscriptions, and selector evaluations all fail with this error once the store
/// has been destroyed. Mutations do not; see [`Store::set_state()`].
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("store {store:?} was destroyed; cannot {operation}")]
#[non_exhaustive]
pub struct DestroyedAccess {
    /// Name of the store, as configured by [`StoreOptions::name()`](crate::StoreOptions::name).
    pub store: String,
    /// The operation which was attempted, such as `"read state"`.
    pub operation: &'static str,
}

impl DestroyedAccess {
    pub(crate) fn new(store: &str, operation: &'static str) -> Self {
        Self {
            store: store.to_owned(),
            operation,
        }
    }
}
