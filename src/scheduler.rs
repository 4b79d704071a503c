use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::util::panic_message;

#[cfg(doc)]
use crate::Store;

// -------------------------------------------------------------------------------------------------

type Thunk = Box<dyn FnOnce()>;

/// Reentrant transaction boundary which defers notification delivery while a batch is open.
///
/// A `BatchScheduler` owns a transaction depth counter and a FIFO queue of deferred callbacks
/// (“thunks”). While the depth is zero, [`schedule_batch()`](Self::schedule_batch) runs its thunk
/// immediately; while any batch is open, thunks are queued and run when the outermost
/// batch closes.
///
/// Cloning a `BatchScheduler` produces another handle to the same counter and queue.
/// Every [`Store`] created without an explicit scheduler uses [`BatchScheduler::current()`],
/// so a [`batch()`](Self::batch) opened anywhere on a thread defers the notifications of
/// every such store on that thread, including ones unrelated to the code inside the batch.
///
/// # Example
///
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use statebox::BatchScheduler;
///
/// let scheduler = BatchScheduler::new();
/// let log = Rc::new(RefCell::new(Vec::new()));
///
/// scheduler.batch(|| {
///     let log2 = log.clone();
///     scheduler.schedule_batch(move || log2.borrow_mut().push("deferred"));
///     log.borrow_mut().push("inside");
/// });
/// assert_eq!(*log.borrow(), ["inside", "deferred"]);
/// ```
#[derive(Clone, Default)]
pub struct BatchScheduler {
    shared: Rc<Shared>,
}

#[derive(Default)]
struct Shared {
    depth: Cell<usize>,
    /// Incremented by [`BatchScheduler::reset()`]; guards from an earlier generation are inert.
    generation: Cell<u64>,
    /// True while thunks are being run; thunks scheduled meanwhile wait their turn in `queue`.
    draining: Cell<bool>,
    queue: RefCell<VecDeque<Thunk>>,
}

thread_local! {
    static CURRENT: BatchScheduler = BatchScheduler::new();
}

impl BatchScheduler {
    /// Constructs a new scheduler with no open batch, independent of all others.
    ///
    /// Most applications should use [`BatchScheduler::current()`] instead, so that batches
    /// apply to every store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle to this thread's default scheduler.
    #[must_use]
    pub fn current() -> Self {
        CURRENT.with(Clone::clone)
    }

    /// Runs `thunk` now if no batch is open, or queues it to run when the outermost batch closes.
    ///
    /// If thunks are already being run, `thunk` is queued behind them, so that each thunk
    /// runs to completion before the next begins.
    ///
    /// A panic in `thunk` is caught and logged, and does not prevent other queued thunks
    /// from running.
    pub fn schedule_batch<F>(&self, thunk: F)
    where
        F: FnOnce() + 'static,
    {
        self.shared.queue.borrow_mut().push_back(Box::new(thunk));
        if self.shared.depth.get() == 0 && !self.shared.draining.get() {
            self.drain();
        }
    }

    /// Returns whether a batch is currently open.
    #[must_use]
    pub fn is_batching(&self) -> bool {
        self.shared.depth.get() > 0
    }

    /// Returns the number of batches currently open (nested).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.shared.depth.get()
    }

    /// Returns the number of thunks waiting for the outermost batch to close.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.queue.borrow().len()
    }

    /// Calls `f` with a batch open, deferring every thunk scheduled meanwhile until the
    /// outermost batch closes.
    ///
    /// The batch is closed even if `f` panics; in that case the queue is still drained
    /// before the panic continues.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.open();
        f()
    }

    /// Like [`batch()`](Self::batch), but keeps the batch open until the future returned by `f`
    /// completes.
    ///
    /// The batch opens when `batch_async()` is called, not when the returned future is first
    /// polled, and it closes exactly once: when the future completes, or when it is dropped
    /// without completing. The future’s output is returned after the batch closes, so queued
    /// thunks run even if the output is an error.
    ///
    /// Mutations made by any other code on this scheduler while the future is suspended are
    /// coalesced into the same batch.
    pub fn batch_async<F, Fut>(&self, f: F) -> impl Future<Output = Fut::Output>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let guard = self.open();
        let future = f();
        async move {
            let output = future.await;
            drop(guard);
            output
        }
    }

    /// Closes all open batches and discards all queued thunks without running them.
    ///
    /// This is intended for isolating tests from each other; stores whose notifications
    /// were discarded start a fresh coalescing window on their next change.
    /// A [`BatchGuard`] still alive when this is called has no further effect on the depth,
    /// even if dropped while a later batch is open.
    ///
    /// If called from within a queued thunk, that thunk still runs to completion before any
    /// thunk it schedules afterward.
    pub fn reset(&self) {
        self.shared.depth.set(0);
        self.shared
            .generation
            .set(self.shared.generation.get().wrapping_add(1));
        let discarded = mem::take(&mut *self.shared.queue.borrow_mut());
        // Thunks are dropped outside the borrow, because dropping them may schedule more work.
        drop(discarded);
    }

    fn open(&self) -> BatchGuard {
        self.shared.depth.set(self.shared.depth.get() + 1);
        BatchGuard {
            scheduler: self.clone(),
            generation: self.shared.generation.get(),
        }
    }

    fn close(&self, generation: u64) {
        if generation != self.shared.generation.get() {
            return;
        }
        let depth = self.shared.depth.get().saturating_sub(1);
        self.shared.depth.set(depth);
        if depth == 0 && !self.shared.draining.get() {
            self.drain();
        }
    }

    #[mutants::skip] // mutating the draining flag hangs instead of failing
    fn drain(&self) {
        self.shared.draining.set(true);
        let _reset = DrainingReset(&self.shared);
        let mut ran = 0_usize;
        loop {
            let Some(thunk) = self.shared.queue.borrow_mut().pop_front() else {
                break;
            };
            ran += 1;
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(thunk)) {
                tracing::error!(
                    panic = panic_message(&*payload),
                    "batched callback panicked"
                );
            }
        }
        tracing::trace!(ran, "batch queue drained");
    }
}

impl fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self
            .shared
            .queue
            .try_borrow()
            .map(|queue| queue.len())
            .ok();
        f.debug_struct("BatchScheduler")
            .field("depth", &self.shared.depth.get())
            .field("pending", &pending)
            .finish()
    }
}

struct DrainingReset<'a>(&'a Shared);

impl Drop for DrainingReset<'_> {
    fn drop(&mut self) {
        self.0.draining.set(false);
    }
}

// -------------------------------------------------------------------------------------------------

/// Holds a batch open until dropped.
///
/// Returned by [`BatchScheduler::open_batch()`]. Prefer [`BatchScheduler::batch()`], which
/// cannot be misused by leaking the guard.
#[must_use = "the batch closes as soon as the guard is dropped"]
pub struct BatchGuard {
    scheduler: BatchScheduler,
    generation: u64,
}

impl BatchScheduler {
    /// Opens a batch which stays open until the returned guard is dropped.
    pub fn open_batch(&self) -> BatchGuard {
        self.open()
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        self.scheduler.close(self.generation);
    }
}

impl fmt::Debug for BatchGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchGuard")
            .field("depth", &self.scheduler.depth())
            .finish()
    }
}

// -------------------------------------------------------------------------------------------------

/// Calls [`BatchScheduler::schedule_batch()`] on this thread’s default scheduler.
pub fn schedule_batch<F>(thunk: F)
where
    F: FnOnce() + 'static,
{
    BatchScheduler::current().schedule_batch(thunk)
}

/// Calls [`BatchScheduler::is_batching()`] on this thread’s default scheduler.
#[must_use]
pub fn is_batching() -> bool {
    BatchScheduler::current().is_batching()
}

/// Calls [`BatchScheduler::batch()`] on this thread’s default scheduler.
///
/// ```
/// use statebox::{batch, Log, Store};
/// use std::collections::BTreeMap;
///
/// let store = Store::new(BTreeMap::from([("count", 0)]));
/// let log = Log::new();
/// let _subscription = store.subscribe(log.listener()).unwrap();
///
/// batch(|| {
///     store.patch(BTreeMap::from([("count", 1)]));
///     store.patch(BTreeMap::from([("count", 2)]));
/// });
///
/// assert_eq!(
///     log.drain(),
///     vec![(BTreeMap::from([("count", 2)]), BTreeMap::from([("count", 0)]))],
/// );
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    BatchScheduler::current().batch(f)
}

/// Calls [`BatchScheduler::batch_async()`] on this thread’s default scheduler.
pub fn batch_async<F, Fut>(f: F) -> impl Future<Output = Fut::Output>
where
    F: FnOnce() -> Fut,
    Fut: Future,
{
    BatchScheduler::current().batch_async(f)
}

// -------------------------------------------------------------------------------------------------
