use std::cell::{Cell, RefCell};
use std::fmt;
use std::mem;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use crate::selector_cache::SelectorCache;
use crate::util::panic_message;
use crate::{
    BatchScheduler, DestroyedAccess, Listener, Resolved, Selector, Snapshot, State, Update,
};

// -------------------------------------------------------------------------------------------------

type Equality<T> = Box<dyn Fn(&T, &T) -> bool>;

/// An observable container for a value of type `T`, which notifies its listeners when the
/// value changes, coalescing bursts of changes into a single notification.
///
/// # Notifications
///
/// Each accepted mutation replaces the current [`Snapshot`] and asks the store’s
/// [`BatchScheduler`] to flush. Outside of a batch, the flush happens before
/// [`set_state()`](Self::set_state) returns. Inside a batch, the first mutation opens a
/// *coalescing window* and remembers the snapshot from before it; further mutations only
/// replace the snapshot; and when the outermost batch closes, each listener is called exactly
/// once with the final snapshot and the remembered one.
///
/// Mutations which the store’s equality function judges to be no change are ignored entirely.
///
/// # Selectors
///
/// [`select()`](Self::select) memoizes derived values per [`Selector`], keyed by the store’s
/// version counter: a cached value is reused until the next accepted mutation.
///
/// # Lifecycle
///
/// `Store` is a cheaply cloned handle; all clones refer to the same state.
/// [`destroy()`](Self::destroy) releases all listeners and cached values, after which reads,
/// subscriptions, and selections fail with [`DestroyedAccess`] and mutations are ignored.
/// Listeners which own a clone of the store keep it alive until it is destroyed.
///
/// # Example
///
/// ```
/// use std::collections::BTreeMap;
/// use statebox::{batch, Log, Store};
///
/// let store = Store::new(BTreeMap::from([("count", 0)]));
/// let log = Log::new();
/// let subscription = store.subscribe(log.listener()).unwrap();
///
/// // A no-op change is not delivered.
/// store.patch(BTreeMap::from([("count", 0)]));
/// assert_eq!(log.drain(), vec![]);
///
/// batch(|| {
///     store.patch(BTreeMap::from([("count", 1)]));
///     store.patch(BTreeMap::from([("count", 2)]));
/// });
/// assert_eq!(
///     log.drain(),
///     vec![(BTreeMap::from([("count", 2)]), BTreeMap::from([("count", 0)]))],
/// );
///
/// subscription.unsubscribe();
/// assert_eq!(store.listener_count(), 0);
/// ```
///
/// # Generic parameters
///
/// * `T` is the type of the state.
pub struct Store<T: State> {
    inner: Rc<Inner<T>>,
}

struct Inner<T: State> {
    name: String,
    equality: Equality<T>,
    scheduler: BatchScheduler,
    core: RefCell<Core<T>>,
}

/// Mutable part of the store.
///
/// Never borrowed while calling out to listeners, selectors, equality functions, or updates,
/// so those may all use the store reentrantly.
struct Core<T: State> {
    snapshot: Snapshot<T>,
    version: u64,
    /// Present iff a flush has been scheduled and not yet run.
    window_start: Option<Snapshot<T>>,
    listeners: Vec<Rc<Subscriber<T>>>,
    next_listener_id: u64,
    cache: SelectorCache,
    destroyed: bool,
}

struct Subscriber<T> {
    id: u64,
    /// Cleared on unsubscribe, so that a flush already in progress skips this listener.
    active: Cell<bool>,
    listener: Box<dyn Listener<T>>,
}

// -------------------------------------------------------------------------------------------------

/// Configuration for [`Store::with_options()`].
///
/// ```
/// use std::collections::BTreeMap;
/// use std::num::NonZeroUsize;
/// use statebox::{BatchScheduler, Store, StoreOptions};
///
/// type Settings = BTreeMap<&'static str, i32>;
///
/// let store = Store::with_options(
///     Settings::from([("volume", 3)]),
///     StoreOptions::new()
///         .name("settings")
///         // only the set of keys matters
///         .equality(|a: &Settings, b: &Settings| a.keys().eq(b.keys()))
///         .selector_cache_capacity(NonZeroUsize::new(8).unwrap())
///         .scheduler(BatchScheduler::new()),
/// );
/// assert_eq!(store.name(), "settings");
///
/// store.patch(Settings::from([("volume", 4)]));
/// assert_eq!(store.version(), 0);
/// store.patch(Settings::from([("muted", 1)]));
/// assert_eq!(store.version(), 1);
/// ```
pub struct StoreOptions<T> {
    name: String,
    equality: Option<Equality<T>>,
    selector_cache_capacity: NonZeroUsize,
    scheduler: Option<BatchScheduler>,
}

impl<T: State> StoreOptions<T> {
    /// Default options: named `"store"`, compared with [`State::shallow_eq()`],
    /// caching up to 50 selector results, using [`BatchScheduler::current()`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: String::from("store"),
            equality: None,
            selector_cache_capacity: SelectorCache::DEFAULT_CAPACITY,
            scheduler: None,
        }
    }

    /// Sets the name used in log events and errors.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the function deciding whether a candidate state is unchanged from the current one.
    ///
    /// It is called as `equality(&candidate, &current)`. A panic in it propagates to the
    /// caller of [`Store::set_state()`].
    #[must_use]
    pub fn equality<E>(mut self, equality: E) -> Self
    where
        E: Fn(&T, &T) -> bool + 'static,
    {
        self.equality = Some(Box::new(equality));
        self
    }

    /// Sets the maximum number of selector results kept by [`Store::select()`].
    #[must_use]
    pub fn selector_cache_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.selector_cache_capacity = capacity;
        self
    }

    /// Sets the scheduler which decides when notifications are delivered.
    #[must_use]
    pub fn scheduler(mut self, scheduler: BatchScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

impl<T: State> Default for StoreOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for StoreOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("name", &self.name)
            .field("custom_equality", &self.equality.is_some())
            .field("selector_cache_capacity", &self.selector_cache_capacity)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

// -------------------------------------------------------------------------------------------------

impl<T: State> Store<T> {
    /// Constructs a store with the given initial state and default [`StoreOptions`].
    #[must_use]
    pub fn new(initial: T) -> Self {
        Self::with_options(initial, StoreOptions::new())
    }

    /// Constructs a store with the given initial state and options.
    #[must_use]
    pub fn with_options(initial: T, options: StoreOptions<T>) -> Self {
        let StoreOptions {
            name,
            equality,
            selector_cache_capacity,
            scheduler,
        } = options;
        Self {
            inner: Rc::new(Inner {
                name,
                equality: equality.unwrap_or_else(|| Box::new(T::shallow_eq)),
                scheduler: scheduler.unwrap_or_else(BatchScheduler::current),
                core: RefCell::new(Core {
                    snapshot: Rc::new(initial),
                    version: 0,
                    window_start: None,
                    listeners: Vec::new(),
                    next_listener_id: 0,
                    cache: SelectorCache::new(selector_cache_capacity),
                    destroyed: false,
                }),
            }),
        }
    }

    /// Returns the name this store was configured with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the scheduler this store delivers notifications through.
    #[must_use]
    pub fn scheduler(&self) -> &BatchScheduler {
        &self.inner.scheduler
    }

    /// Returns the current state.
    ///
    /// # Errors
    ///
    /// Returns [`DestroyedAccess`] if [`destroy()`](Self::destroy) has been called.
    pub fn get_state(&self) -> Result<Snapshot<T>, DestroyedAccess> {
        let core = self.inner.core.borrow();
        if core.destroyed {
            return Err(self.inner.destroyed("read state"));
        }
        Ok(Rc::clone(&core.snapshot))
    }

    /// Returns the number of accepted mutations so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.core.borrow().version
    }

    /// Applies `update` to the state, and schedules a notification if the state changed.
    ///
    /// The candidate state is compared to the current state with the store’s equality function
    /// (by default [`State::shallow_eq()`]); if they are equal, nothing else happens.
    /// Otherwise the candidate becomes the current state, the version increments, and a flush
    /// is requested from the store’s [`BatchScheduler`] unless one is already pending.
    ///
    /// After [`destroy()`](Self::destroy), this does nothing except log a diagnostic.
    ///
    /// Panics from an [`Update::Compute`] function or the equality function propagate to the
    /// caller; the store is left unchanged.
    ///
    /// If the `Compute` function or the equality function itself mutates this store, the
    /// candidate computed here still replaces the state, overwriting that mutation, and an
    /// error is logged.
    pub fn set_state(&self, update: Update<T>) {
        let current = {
            let core = self.inner.core.borrow();
            if core.destroyed {
                tracing::debug!(store = %self.inner.name, "ignoring set_state on destroyed store");
                return;
            }
            Rc::clone(&core.snapshot)
        };

        let candidate = update.apply(&current);
        if (self.inner.equality)(&candidate, &*current) {
            tracing::trace!(store = %self.inner.name, "set_state made no change");
            return;
        }

        let schedule = {
            let mut core = self.inner.core.borrow_mut();
            if core.destroyed {
                // destroyed by the update or equality function
                tracing::debug!(store = %self.inner.name, "ignoring set_state on destroyed store");
                return;
            }
            if !Rc::ptr_eq(&core.snapshot, &current) {
                tracing::error!(
                    store = %self.inner.name,
                    "state was changed while computing an update; overwriting that change"
                );
            }
            let prev = mem::replace(&mut core.snapshot, Rc::new(candidate));
            core.version += 1;
            tracing::debug!(store = %self.inner.name, version = core.version, "state changed");
            if core.window_start.is_none() {
                core.window_start = Some(prev);
                true
            } else {
                false
            }
        };

        if schedule {
            let ticket = FlushTicket {
                inner: Rc::downgrade(&self.inner),
                delivered: false,
            };
            self.inner
                .scheduler
                .schedule_batch(move || ticket.deliver());
        }
    }

    /// Merges `patch` over the current state.
    ///
    /// Equivalent to `self.set_state(Update::Patch(patch))`.
    pub fn patch(&self, patch: T::Patch) {
        self.set_state(Update::Patch(patch));
    }

    /// Replaces the current state.
    ///
    /// Equivalent to `self.set_state(Update::Replace(value))`.
    pub fn replace(&self, value: T) {
        self.set_state(Update::Replace(value));
    }

    /// Computes a patch or replacement from the current state.
    ///
    /// Equivalent to `self.set_state(Update::compute(function))`.
    pub fn update<F>(&self, function: F)
    where
        F: FnOnce(&T) -> Resolved<T> + 'static,
    {
        self.set_state(Update::compute(function));
    }

    /// Registers `listener` to be called on every flush, until the returned handle’s
    /// [`unsubscribe()`](Unsubscribe::unsubscribe) is called or the store is destroyed.
    ///
    /// Listeners are called in the order they subscribed. Subscribing the same listener value
    /// twice creates two independent registrations.
    ///
    /// # Errors
    ///
    /// Returns [`DestroyedAccess`] if [`destroy()`](Self::destroy) has been called.
    pub fn subscribe<L>(&self, listener: L) -> Result<Unsubscribe, DestroyedAccess>
    where
        L: Listener<T> + 'static,
    {
        let mut core = self.inner.core.borrow_mut();
        if core.destroyed {
            return Err(self.inner.destroyed("subscribe"));
        }
        let id = core.next_listener_id;
        core.next_listener_id += 1;
        core.listeners.push(Rc::new(Subscriber {
            id,
            active: Cell::new(true),
            listener: Box::new(listener),
        }));
        drop(core);

        let weak: Weak<Inner<T>> = Rc::downgrade(&self.inner);
        let registry: Weak<dyn Registry> = weak;
        Ok(Unsubscribe { registry, id })
    }

    /// Returns the value of `selector` for the current state, computing it only if there is no
    /// result cached since the last accepted mutation.
    ///
    /// Results are cached per selector identity (not per closure body), and up to the
    /// configured capacity; the least recently used result is evicted to make room.
    ///
    /// A panic in the selector function propagates to the caller and caches nothing.
    ///
    /// # Errors
    ///
    /// Returns [`DestroyedAccess`] if [`destroy()`](Self::destroy) has been called.
    pub fn select<R>(&self, selector: &Selector<T, R>) -> Result<R, DestroyedAccess>
    where
        R: Clone + 'static,
    {
        let (snapshot, version) = {
            let mut core = self.inner.core.borrow_mut();
            if core.destroyed {
                return Err(self.inner.destroyed("select"));
            }
            let version = core.version;
            let cached = core
                .cache
                .get(selector.id(), version)
                .and_then(|value| value.downcast_ref::<R>())
                .cloned();
            if let Some(value) = cached {
                tracing::trace!(store = %self.inner.name, selector = ?selector.id(), "selector cache hit");
                return Ok(value);
            }
            (Rc::clone(&core.snapshot), version)
        };

        let value = selector.compute(&snapshot);
        tracing::trace!(store = %self.inner.name, selector = ?selector.id(), version, "selector computed");

        let mut core = self.inner.core.borrow_mut();
        if !core.destroyed {
            if let Some(evicted) =
                core.cache
                    .insert(selector.id(), Box::new(value.clone()), version)
            {
                tracing::trace!(store = %self.inner.name, ?evicted, "selector cache evicted");
            }
        }
        Ok(value)
    }

    /// Calls `callback(&next, &prev)` after each flush in which the value of `selector` changed,
    /// according to [`Selector::same()`].
    ///
    /// The value is evaluated through [`select()`](Self::select), so it is shared with other
    /// users of the same selector and is computed from the store’s state at the time of the
    /// flush.
    ///
    /// ```
    /// use std::cell::RefCell;
    /// use std::collections::BTreeMap;
    /// use std::rc::Rc;
    /// use statebox::{Selector, Store};
    ///
    /// let store = Store::new(BTreeMap::from([("a", 1), ("b", 1)]));
    /// let a = Selector::new(|state: &BTreeMap<&str, i32>| state["a"]);
    /// let seen = Rc::new(RefCell::new(Vec::new()));
    /// let seen2 = seen.clone();
    /// let _watch = store
    ///     .watch(&a, move |next: &i32, prev: &i32| seen2.borrow_mut().push((*next, *prev)))
    ///     .unwrap();
    ///
    /// store.patch(BTreeMap::from([("b", 2)]));
    /// store.patch(BTreeMap::from([("a", 5)]));
    /// assert_eq!(*seen.borrow(), [(5, 1)]);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`DestroyedAccess`] if [`destroy()`](Self::destroy) has been called.
    pub fn watch<R, F>(
        &self,
        selector: &Selector<T, R>,
        callback: F,
    ) -> Result<Unsubscribe, DestroyedAccess>
    where
        R: Clone + 'static,
        F: Fn(&R, &R) + 'static,
    {
        let initial = self.select(selector)?;
        self.subscribe(Watch {
            store: Rc::downgrade(&self.inner),
            selector: selector.clone(),
            last: RefCell::new(initial),
            callback,
        })
    }

    /// Releases all listeners and cached selector results, and discards any pending
    /// notification.
    ///
    /// Afterward, [`get_state()`](Self::get_state), [`subscribe()`](Self::subscribe), and
    /// [`select()`](Self::select) fail with [`DestroyedAccess`], and
    /// [`set_state()`](Self::set_state) is ignored. Calling `destroy()` again has no effect.
    pub fn destroy(&self) {
        let released = {
            let mut core = self.inner.core.borrow_mut();
            if core.destroyed {
                tracing::debug!(store = %self.inner.name, "store already destroyed");
                return;
            }
            core.destroyed = true;
            core.window_start = None;
            core.cache.clear();
            mem::take(&mut core.listeners)
        };
        for subscriber in &released {
            subscriber.active.set(false);
        }
        tracing::debug!(store = %self.inner.name, listeners = released.len(), "store destroyed");
        // Listeners are dropped outside the borrow, since their destructors may use the store.
        drop(released);
    }

    /// Returns whether [`destroy()`](Self::destroy) has been called.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.core.borrow().destroyed
    }

    /// Returns the number of currently registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.core.borrow().listeners.len()
    }
}

impl<T: State> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: State + fmt::Debug> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ds = f.debug_struct("Store");
        ds.field("name", &self.inner.name);
        if let Ok(core) = self.inner.core.try_borrow() {
            ds.field("version", &core.version)
                .field("state", &*core.snapshot)
                .field("listeners", &core.listeners.len())
                .field("destroyed", &core.destroyed)
                .finish()
        } else {
            ds.finish_non_exhaustive()
        }
    }
}

// -------------------------------------------------------------------------------------------------

impl<T: State> Inner<T> {
    fn destroyed(&self, operation: &'static str) -> DestroyedAccess {
        DestroyedAccess::new(&self.name, operation)
    }

    /// Delivers the pending notification, if there still is one, to every listener.
    fn flush(&self) {
        let (next, prev, subscribers) = {
            let mut core = self.core.borrow_mut();
            let Some(prev) = core.window_start.take() else {
                return;
            };
            (Rc::clone(&core.snapshot), prev, core.listeners.clone())
        };
        tracing::trace!(store = %self.name, listeners = subscribers.len(), "flushing");

        for subscriber in &subscribers {
            if !subscriber.active.get() {
                continue;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                subscriber.listener.receive(&next, &prev);
            }));
            if let Err(payload) = outcome {
                tracing::error!(
                    store = %self.name,
                    listener = subscriber.id,
                    panic = panic_message(&*payload),
                    "listener panicked"
                );
            }
        }
    }

    /// Forgets the pending notification, if any, without delivering it.
    fn abandon_window(&self) {
        if self.core.borrow_mut().window_start.take().is_some() {
            tracing::debug!(store = %self.name, "pending notification discarded");
        }
    }
}

/// The part of a store an [`Unsubscribe`] needs, without its state type.
trait Registry {
    /// Returns whether the listener was registered.
    fn remove(&self, id: u64) -> bool;
}

impl<T: State> Registry for Inner<T> {
    fn remove(&self, id: u64) -> bool {
        let removed = {
            let mut core = self.core.borrow_mut();
            let Some(index) = core.listeners.iter().position(|s| s.id == id) else {
                return false;
            };
            core.listeners.remove(index)
        };
        removed.active.set(false);
        drop(removed);
        true
    }
}

/// Scheduled to run [`Inner::flush()`] for one coalescing window.
///
/// If the scheduler discards it instead (see [`BatchScheduler::reset()`]), the window is
/// closed so that the next mutation schedules a new flush.
struct FlushTicket<T: State> {
    inner: Weak<Inner<T>>,
    delivered: bool,
}

impl<T: State> FlushTicket<T> {
    fn deliver(mut self) {
        self.delivered = true;
        if let Some(inner) = self.inner.upgrade() {
            inner.flush();
        }
    }
}

impl<T: State> Drop for FlushTicket<T> {
    fn drop(&mut self) {
        if !self.delivered {
            if let Some(inner) = self.inner.upgrade() {
                inner.abandon_window();
            }
        }
    }
}

/// [`Store::watch()`] implementation.
struct Watch<T: State, R, F> {
    store: Weak<Inner<T>>,
    selector: Selector<T, R>,
    last: RefCell<R>,
    callback: F,
}

impl<T, R, F> Listener<T> for Watch<T, R, F>
where
    T: State,
    R: Clone + 'static,
    F: Fn(&R, &R),
{
    fn receive(&self, _next: &T, _prev: &T) {
        let Some(inner) = self.store.upgrade() else {
            return;
        };
        let Ok(next) = (Store { inner }).select(&self.selector) else {
            return;
        };
        let prev = {
            let last = self.last.borrow();
            if self.selector.same(&next, &last) {
                return;
            }
            last.clone()
        };
        *self.last.borrow_mut() = next.clone();
        (self.callback)(&next, &prev);
    }
}

// -------------------------------------------------------------------------------------------------

/// Handle returned by [`Store::subscribe()`] and [`Store::watch()`], which can remove the
/// listener it was returned for.
///
/// Dropping this handle does *not* remove the listener.
pub struct Unsubscribe {
    registry: Weak<dyn Registry>,
    id: u64,
}

impl Unsubscribe {
    /// Removes the listener from its store.
    ///
    /// Returns `true` if the listener was registered until now, and `false` if it had already
    /// been removed by an earlier call or by [`Store::destroy()`]. Calling this any number of
    /// times is harmless.
    ///
    /// If the store is flushing, the listener is not called for the rest of that flush.
    #[allow(clippy::must_use_candidate)]
    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(self.id),
            None => false,
        }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("id", &self.id)
            .field("store_alive", &(self.registry.strong_count() > 0))
            .finish()
    }
}

// -------------------------------------------------------------------------------------------------
