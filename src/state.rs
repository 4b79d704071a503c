use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::rc::Rc;
use std::sync::Arc;

#[cfg(doc)]
use crate::{Store, StoreOptions};

// -------------------------------------------------------------------------------------------------

/// An immutable state value held by a [`Store`] at a point in time.
///
/// Every accepted change produces a new snapshot; existing snapshots are never mutated.
pub type Snapshot<T> = Rc<T>;

/// A value which can be held by a [`Store`].
///
/// The store needs two things from its state type beyond [`Clone`]: a way to apply a partial
/// update ([`merge()`](Self::merge)), and a default notion of “unchanged”
/// ([`shallow_eq()`](Self::shallow_eq)) used to suppress no-op mutations.
///
/// # Example
///
/// ```
/// #[derive(Clone, Debug, PartialEq)]
/// struct Counter {
///     count: i32,
///     label: &'static str,
/// }
///
/// #[derive(Default)]
/// struct CounterPatch {
///     count: Option<i32>,
///     label: Option<&'static str>,
/// }
///
/// impl statebox::State for Counter {
///     type Patch = CounterPatch;
///
///     fn merge(&mut self, patch: CounterPatch) {
///         if let Some(count) = patch.count {
///             self.count = count;
///         }
///         if let Some(label) = patch.label {
///             self.label = label;
///         }
///     }
///
///     fn shallow_eq(&self, other: &Self) -> bool {
///         self.count == other.count && self.label == other.label
///     }
/// }
/// ```
pub trait State: Clone + 'static {
    /// A partial update, containing values for some subset of the top-level fields.
    type Patch;

    /// Overwrites the top-level fields named by `patch` with its values.
    ///
    /// Fields nested inside those values must be replaced wholesale, not merged.
    fn merge(&mut self, patch: Self::Patch);

    /// Compares the top-level fields of two states.
    ///
    /// This is the default equality of a [`Store`] (which [`StoreOptions::equality()`] can
    /// override). Implementations should compare each field cheaply, by value for small
    /// values and by pointer for shared ones such as [`Rc`], rather than comparing the
    /// entire structure deeply.
    fn shallow_eq(&self, other: &Self) -> bool;
}

/// A map is merged by inserting every entry of the patch, and compared entry by entry with
/// [`ShallowEq`], so a value held in an [`Rc`] is unchanged only if it is the same allocation.
impl<K, V> State for BTreeMap<K, V>
where
    K: Ord + Clone + 'static,
    V: ShallowEq + Clone + 'static,
{
    type Patch = BTreeMap<K, V>;

    fn merge(&mut self, patch: Self::Patch) {
        self.extend(patch);
    }

    fn shallow_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .zip(other)
                .all(|((ka, va), (kb, vb))| ka == kb && va.shallow_eq(vb))
    }
}

/// A map is merged by inserting every entry of the patch, and compared entry by entry with
/// [`ShallowEq`], so a value held in an [`Rc`] is unchanged only if it is the same allocation.
impl<K, V, S> State for HashMap<K, V, S>
where
    K: Eq + Hash + Clone + 'static,
    V: ShallowEq + Clone + 'static,
    S: BuildHasher + Clone + 'static,
{
    type Patch = HashMap<K, V, S>;

    fn merge(&mut self, patch: Self::Patch) {
        self.extend(patch);
    }

    fn shallow_eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|o| v.shallow_eq(o)))
    }
}

// -------------------------------------------------------------------------------------------------

/// One-level equality for the values inside a map state.
///
/// Leaf values (numbers, strings, and the like) compare by value. Shared pointers compare by
/// identity, without looking at what they point to: to have a nested structure count as
/// changed, put a new allocation in the state.
///
/// ```
/// use std::rc::Rc;
/// use statebox::ShallowEq;
///
/// let items = Rc::new(vec![1, 2, 3]);
/// assert!(items.shallow_eq(&items.clone()));
/// assert!(!items.shallow_eq(&Rc::new(vec![1, 2, 3])));
/// assert!(Some(5).shallow_eq(&Some(5)));
/// ```
pub trait ShallowEq {
    /// Returns whether `self` and `other` are the same at the top level.
    fn shallow_eq(&self, other: &Self) -> bool;
}

macro_rules! shallow_eq_by_value {
    ($($t:ty),* $(,)?) => {
        $(
            impl ShallowEq for $t {
                #[inline]
                fn shallow_eq(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

shallow_eq_by_value!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String,
    &'static str,
);

impl<T: ?Sized> ShallowEq for Rc<T> {
    fn shallow_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(self, other)
    }
}

impl<T: ?Sized> ShallowEq for Arc<T> {
    fn shallow_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl<T: ShallowEq> ShallowEq for Option<T> {
    fn shallow_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.shallow_eq(b),
            (None, None) => true,
            _ => false,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// A requested change to the state of a [`Store`], passed to [`Store::set_state()`].
///
/// The variants make merge-versus-replace intent explicit: a [`Patch`](Self::Patch) that
/// happens to mention every field is still a merge, and a [`Replace`](Self::Replace) never
/// retains any part of the old state.
#[allow(clippy::exhaustive_enums, reason = "the set of update shapes is closed")]
pub enum Update<T: State> {
    /// Merge the patch over the current state with [`State::merge()`].
    Patch(T::Patch),
    /// Replace the current state.
    Replace(T),
    /// Compute a patch or replacement from the current state.
    ///
    /// The function should not mutate the store it is applied to; if it does, the result
    /// still overwrites that mutation.
    Compute(Box<dyn FnOnce(&T) -> Resolved<T>>),
}

/// The result of an [`Update::Compute`] function.
#[allow(clippy::exhaustive_enums, reason = "the set of update shapes is closed")]
pub enum Resolved<T: State> {
    /// Merge the patch over the current state.
    Patch(T::Patch),
    /// Replace the current state.
    Replace(T),
}

impl<T: State> Update<T> {
    /// Constructs an [`Update::Compute`] from a function.
    pub fn compute<F>(function: F) -> Self
    where
        F: FnOnce(&T) -> Resolved<T> + 'static,
    {
        Self::Compute(Box::new(function))
    }

    /// Produces the candidate next state.
    ///
    /// The current state is cloned only if a patch is to be merged.
    pub(crate) fn apply(self, current: &T) -> T {
        let resolved = match self {
            Update::Patch(patch) => Resolved::Patch(patch),
            Update::Replace(value) => Resolved::Replace(value),
            Update::Compute(function) => function(current),
        };
        match resolved {
            Resolved::Patch(patch) => {
                let mut next = current.clone();
                next.merge(patch);
                next
            }
            Resolved::Replace(value) => value,
        }
    }
}

impl<T> fmt::Debug for Update<T>
where
    T: State + fmt::Debug,
    T::Patch: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Patch(patch) => f.debug_tuple("Patch").field(patch).finish(),
            Self::Replace(value) => f.debug_tuple("Replace").field(value).finish(),
            Self::Compute(_) => f.debug_tuple("Compute").finish_non_exhaustive(),
        }
    }
}

impl<T> fmt::Debug for Resolved<T>
where
    T: State + fmt::Debug,
    T::Patch: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Patch(patch) => f.debug_tuple("Patch").field(patch).finish(),
            Self::Replace(value) => f.debug_tuple("Replace").field(value).finish(),
        }
    }
}

// -------------------------------------------------------------------------------------------------
