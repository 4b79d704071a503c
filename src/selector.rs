use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::util::Unquote;

#[cfg(doc)]
use crate::Store;

// -------------------------------------------------------------------------------------------------

/// Identity of a [`Selector`], used as its cache key.
///
/// Each call to [`Selector::new()`] or [`Selector::with_equality()`] allocates a new identity;
/// clones of a selector share it.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SelectorId(u64);

impl SelectorId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A registered handle to a pure function deriving a value of type `R` from a state of type `T`.
///
/// [`Store::select()`] memoizes the result per selector identity, so a selector should be
/// created once and reused, not created anew for each call. Two selectors built from
/// identical closures are distinct and are cached separately.
///
/// A selector also carries an equality function for the derived value, used by
/// [`Store::watch()`] to decide whether a change is worth reporting. It never affects
/// whether a cached value is reused.
pub struct Selector<T, R> {
    id: SelectorId,
    function: Rc<dyn Fn(&T) -> R>,
    equality: Rc<dyn Fn(&R, &R) -> bool>,
    type_name: Unquote<'static>,
}

impl<T, R> Selector<T, R> {
    /// Registers `function` as a new selector, comparing its results with [`PartialEq`].
    ///
    /// ```
    /// use std::collections::BTreeMap;
    /// use statebox::{Selector, Store};
    ///
    /// let store = Store::new(BTreeMap::from([("a", 2), ("b", 3)]));
    /// let total = Selector::new(|state: &BTreeMap<&str, i32>| state.values().sum::<i32>());
    /// assert_eq!(store.select(&total), Ok(5));
    /// ```
    #[must_use]
    pub fn new<F>(function: F) -> Self
    where
        F: Fn(&T) -> R + 'static,
        R: PartialEq,
    {
        Self::with_equality(function, |a: &R, b: &R| a == b)
    }

    /// Registers `function` as a new selector, comparing its results with `equality`.
    #[must_use]
    pub fn with_equality<F, E>(function: F, equality: E) -> Self
    where
        F: Fn(&T) -> R + 'static,
        E: Fn(&R, &R) -> bool + 'static,
    {
        Self {
            id: SelectorId::next(),
            function: Rc::new(function),
            equality: Rc::new(equality),
            type_name: Unquote::type_name::<F>(),
        }
    }

    /// Returns the identity of this selector.
    #[must_use]
    pub fn id(&self) -> SelectorId {
        self.id
    }

    /// Invokes the selector function directly, bypassing any cache.
    pub fn compute(&self, state: &T) -> R {
        (self.function)(state)
    }

    /// Compares two derived values with this selector’s equality function.
    pub fn same(&self, a: &R, b: &R) -> bool {
        (self.equality)(a, b)
    }
}

impl<T, R> Clone for Selector<T, R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            function: Rc::clone(&self.function),
            equality: Rc::clone(&self.equality),
            type_name: self.type_name,
        }
    }
}

impl<T, R> fmt::Debug for Selector<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("id", &self.id.0)
            .field("function", &self.type_name)
            .finish_non_exhaustive()
    }
}

// -------------------------------------------------------------------------------------------------
