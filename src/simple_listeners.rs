use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak as ArcWeak};

use crate::{DestroyedAccess, Listener, State, Store, Unsubscribe};

// -------------------------------------------------------------------------------------------------

/// A [`Listener`] destination which stores every `(next, prev)` pair it receives.
///
/// This is only intended for testing; real listeners should not unboundedly accumulate
/// copies of the state.
///
/// # Generic parameters
///
/// * `T` is the type of the state.
pub struct Log<T>(Rc<RefCell<Vec<(T, T)>>>);

/// [`Log::listener()`] implementation.
///
/// # Generic parameters
///
/// * `T` is the type of the state.
pub struct LogListener<T>(Weak<RefCell<Vec<(T, T)>>>);

impl<T> Log<T> {
    /// Constructs a new empty [`Log`].
    #[must_use]
    pub fn new() -> Self {
        Self(Rc::default())
    }

    /// Returns a [`Listener`] which records the notifications it receives in this `Log`.
    #[must_use]
    pub fn listener(&self) -> LogListener<T> {
        LogListener(Rc::downgrade(&self.0))
    }

    /// Remove and return all notifications received so far, oldest first.
    ///
    /// ```
    /// use statebox::{Listener, Log};
    ///
    /// let log = Log::new();
    /// log.listener().receive(&2, &1);
    /// log.listener().receive(&3, &2);
    /// assert_eq!(log.drain(), vec![(2, 1), (3, 2)]);
    /// assert_eq!(log.drain(), vec![]);
    /// ```
    #[must_use]
    pub fn drain(&self) -> Vec<(T, T)> {
        self.0.borrow_mut().drain(..).collect()
    }
}

impl<T: fmt::Debug> fmt::Debug for Log<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(entries) => f.debug_tuple("Log").field(&*entries).finish(),
            Err(_) => f.debug_tuple("Log").finish_non_exhaustive(),
        }
    }
}

impl<T> fmt::Debug for LogListener<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogListener")
            .field("alive", &(self.0.strong_count() > 0))
            .finish()
    }
}

impl<T: Clone> Listener<T> for LogListener<T> {
    fn receive(&self, next: &T, prev: &T) {
        if let Some(entries) = self.0.upgrade() {
            entries.borrow_mut().push((next.clone(), prev.clone()));
        }
    }
}

impl<T> Clone for LogListener<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Default for Log<T> {
    fn default() -> Self {
        Self::new()
    }
}

// -------------------------------------------------------------------------------------------------

/// A [`Listener`] destination which records only whether any notification has been received,
/// until cleared.
///
/// It is implemented as a shared [`AtomicBool`].
///
/// The atomic orderings used are [`Release`](Ordering::Release) for setting the flag, and
/// [`Acquire`](Ordering::Acquire) for reading and clearing it.
///
/// The name of this type comes from the concept of a “dirty flag”, marking that state is
/// out of sync, but it can also be understood as a metaphorical mailbox flag:
/// it signals that something has arrived, but not what.
pub struct Flag {
    shared: Arc<AtomicBool>,
}

/// [`Flag::listener()`] implementation.
#[derive(Clone)]
pub struct FlagListener {
    weak: ArcWeak<AtomicBool>,
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never multiline
        write!(f, "Flag({:?})", self.shared.load(Ordering::Relaxed))
    }
}
impl fmt::Debug for FlagListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strong = self.weak.upgrade();

        let mut ds = f.debug_struct("FlagListener");
        ds.field("alive", &strong.is_some());
        if let Some(strong) = strong {
            ds.field("value", &(strong.load(Ordering::Relaxed)));
        }
        ds.finish()
    }
}

impl Flag {
    const SET_ORDERING: Ordering = Ordering::Release;
    const GET_CLEAR_ORDERING: Ordering = Ordering::Acquire;

    /// Constructs a new [`Flag`] with the given initial value.
    ///
    /// ```
    /// # use statebox::Flag;
    /// assert_eq!(Flag::new(false).get_and_clear(), false);
    /// assert_eq!(Flag::new(true).get_and_clear(), true);
    /// ```
    #[must_use]
    pub fn new(value: bool) -> Self {
        Self {
            shared: Arc::new(AtomicBool::new(value)),
        }
    }

    /// Constructs a new [`Flag`] with the given initial value and subscribes its listener
    /// to `store`.
    ///
    /// The subscription is returned alongside the flag so that it can be cancelled.
    ///
    /// ```
    /// use std::collections::BTreeMap;
    /// use statebox::{Flag, Store};
    ///
    /// let store = Store::new(BTreeMap::from([("count", 0)]));
    /// let (flag, _subscription) = Flag::listening(false, &store).unwrap();
    ///
    /// store.patch(BTreeMap::from([("count", 1)]));
    /// assert_eq!(flag.get_and_clear(), true);
    /// store.patch(BTreeMap::from([("count", 1)]));
    /// assert_eq!(flag.get_and_clear(), false);
    /// ```
    pub fn listening<T: State>(
        value: bool,
        store: &Store<T>,
    ) -> Result<(Self, Unsubscribe), DestroyedAccess> {
        let new_self = Self::new(value);
        let subscription = store.subscribe(new_self.listener())?;
        Ok((new_self, subscription))
    }

    /// Returns a [`Listener`] which will set this flag to [`true`] when it receives any
    /// notification.
    #[must_use]
    pub fn listener(&self) -> FlagListener {
        FlagListener {
            weak: Arc::downgrade(&self.shared),
        }
    }

    /// Returns the flag value, setting it to [`false`] at the same time.
    #[allow(clippy::must_use_candidate)]
    #[inline]
    pub fn get_and_clear(&self) -> bool {
        self.shared.swap(false, Self::GET_CLEAR_ORDERING)
    }

    /// Set the flag value to [`true`].
    ///
    /// This may be useful in situations where the caller of `get_and_clear()` realizes it
    /// cannot actually complete its work, but wants to try again later.
    #[inline]
    pub fn set(&self) {
        self.shared.store(true, Self::SET_ORDERING);
    }
}

impl<T: ?Sized> Listener<T> for FlagListener {
    fn receive(&self, _next: &T, _prev: &T) {
        if let Some(cell) = self.weak.upgrade() {
            cell.store(true, Flag::SET_ORDERING);
        }
    }
}

// -------------------------------------------------------------------------------------------------
