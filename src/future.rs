//! Integration with `async` programming.
//!
//! This module is only available if the Cargo feature `"async"` is enabled.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::task::AtomicWaker;

use crate::{DestroyedAccess, Listener, State, Store, Unsubscribe};

// -------------------------------------------------------------------------------------------------

/// A [`Listener`] destination which can wake an async task.
///
/// This is similar to an async channel except that it carries no data, only wakeups.
/// It has a sending side [`WakeFlagListener`] and a receiving side [`WakeFlag`],
/// and the receiving side notices when the sender is gone, such as when the store it was
/// subscribed to is destroyed.
///
/// Its intended use is to allow a looping task to sleep until a store changes.
///
/// # Example
///
/// In this async code sample, we wake a task which keeps `output` equal to ten times the
/// value in `input`:
///
/// ```
/// # async fn yield_now() {
/// #     let mut yielded = false;
/// #     std::future::poll_fn(move |ctx| {
/// #         if yielded {
/// #             std::task::Poll::Ready(())
/// #         } else {
/// #             yielded = true;
/// #             ctx.waker().wake_by_ref();
/// #             std::task::Poll::Pending
/// #         }
/// #     }).await
/// # }
/// # futures::executor::block_on(async {
/// use std::collections::BTreeMap;
/// use futures::join;
/// use statebox::{future::WakeFlag, Store};
///
/// let input = Store::new(BTreeMap::from([("value", 0)]));
/// let output = Store::new(BTreeMap::from([("value", 0)]));
///
/// let mut flag = WakeFlag::listening(true, &input).unwrap();
///
/// join!(
///     {
///         let (input, output) = (input.clone(), output.clone());
///         async move {
///             // Woken task. Its loop exits when `input` is destroyed.
///             while flag.wait().await {
///                 let value = input.get_state().unwrap()["value"];
///                 output.patch(BTreeMap::from([("value", value * 10)]));
///             }
///         }
///     },
///     async {
///         // Writing task.
///         input.patch(BTreeMap::from([("value", 1)]));
///         yield_now().await;
///         assert_eq!(output.get_state().unwrap()["value"], 10);
///
///         input.patch(BTreeMap::from([("value", 2)]));
///         yield_now().await;
///         assert_eq!(output.get_state().unwrap()["value"], 20);
///
///         input.destroy();
///     },
/// );
/// # })
/// ```
pub struct WakeFlag {
    /// Shared state between the [`WakeFlag`] and [`WakeFlagListener`]s.
    shared: Arc<WakeFlagShared>,

    /// Present if this flag subscribed itself, and removed when it is dropped.
    subscription: Option<Unsubscribe>,
}

/// [`WakeFlag`]’s accompanying listener implementation.
#[derive(Clone, Debug)]
pub struct WakeFlagListener {
    shared: Weak<WakeFlagShared>,

    /// This value existing signals to the [`WakeFlag`] that at least one listener exists.
    _alive: Arc<()>,
}

#[derive(Debug)]
struct WakeFlagFuture<'a> {
    shared: &'a WakeFlagShared,
    done: bool,
}

#[derive(Debug)]
struct WakeFlagShared {
    notified: AtomicBool,

    /// This weak reference breaks when no [`WakeFlagListener`]s exist
    /// and thus the flag can never wake again.
    listeners_alive: Weak<()>,

    /// Woken when a notification arrives or a listener is dropped.
    waker: AtomicWaker,
}

impl WakeFlag {
    const SET_ORDERING: Ordering = Ordering::Release;
    const GET_CLEAR_ORDERING: Ordering = Ordering::Acquire;

    /// Constructs a [`WakeFlag`] and paired [`WakeFlagListener`].
    ///
    /// If `wake_immediately` is true, then the waiting task will be woken on the first call
    /// to [`wait()`](Self::wait), even if no notification has been received.
    #[must_use]
    pub fn new(wake_immediately: bool) -> (Self, WakeFlagListener) {
        let strong_alive = Arc::new(());
        let listeners_alive = Arc::downgrade(&strong_alive);
        let shared = Arc::new(WakeFlagShared {
            notified: AtomicBool::new(wake_immediately),
            listeners_alive,
            waker: AtomicWaker::new(),
        });
        let listener = WakeFlagListener {
            shared: Arc::downgrade(&shared),
            _alive: strong_alive,
        };
        (
            Self {
                shared,
                subscription: None,
            },
            listener,
        )
    }

    /// Constructs a [`WakeFlag`] and subscribes its listener to `store`.
    ///
    /// The subscription lasts until the flag is dropped or the store is destroyed.
    /// In the latter case, [`wait()`](Self::wait) starts returning [`false`].
    ///
    /// # Errors
    ///
    /// Returns [`DestroyedAccess`] if `store` has been destroyed.
    pub fn listening<T: State>(
        wake_immediately: bool,
        store: &Store<T>,
    ) -> Result<Self, DestroyedAccess> {
        let (mut flag, listener) = Self::new(wake_immediately);
        flag.subscription = Some(store.subscribe(listener)?);
        Ok(flag)
    }

    /// Suspend the current async task until at least one notification is received,
    /// notifications have already been received since the last call to `wait()`,
    /// or no more notifications will arrive.
    ///
    /// When a notification is received, returns [`true`].
    /// When no more notifications will be received because all listeners have been dropped,
    /// returns [`false`];
    /// afterward, calls to `wait()` will always immediately return [`false`].
    ///
    /// This function is “cancellation safe”: if the future is dropped before it completes,
    /// there is no effect on the state of the [`WakeFlag`], as if `wait()` had never been
    /// called at all.
    //---
    // The `&mut self` only enforces non-concurrent usage, which would lose signals.
    #[inline]
    #[must_use]
    pub async fn wait(&mut self) -> bool {
        WakeFlagFuture {
            shared: &self.shared,
            done: false,
        }
        .await
    }

    /// Set the flag, causing the next call to [`wait()`](Self::wait) to return immediately.
    #[inline]
    pub fn notify(&self) {
        self.shared.notify();
    }
}

impl Drop for WakeFlag {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

impl fmt::Debug for WakeFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakeFlag")
            .field("shared", &self.shared)
            .field("subscribed", &self.subscription.is_some())
            .finish()
    }
}

impl<T: ?Sized> Listener<T> for WakeFlagListener {
    fn receive(&self, _next: &T, _prev: &T) {
        if let Some(shared) = self.shared.upgrade() {
            shared.notify();
        }
    }
}

impl Drop for WakeFlagListener {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.waker.wake();
        }
    }
}

impl Future for WakeFlagFuture<'_> {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        assert!(!self.done);
        let poll_outcome = self.shared.poll(cx);
        if poll_outcome.is_ready() {
            self.get_mut().done = true;
        }
        poll_outcome
    }
}

impl WakeFlagShared {
    fn notify(&self) {
        self.notified.store(true, WakeFlag::SET_ORDERING);
        self.waker.wake();
    }

    /// Shared logic between [`WakeFlagFuture::poll()`] and [`Stream::poll_next()`].
    fn poll(&self, cx: &mut Context<'_>) -> Poll<bool> {
        if let Some(answer) = self.get_and_clear() {
            return Poll::Ready(answer);
        }
        self.waker.register(cx.waker());
        if let Some(answer) = self.get_and_clear() {
            Poll::Ready(answer)
        } else {
            Poll::Pending
        }
    }

    fn get_and_clear(&self) -> Option<bool> {
        if self.notified.swap(false, WakeFlag::GET_CLEAR_ORDERING) {
            Some(true)
        } else if self.listeners_alive.strong_count() == 0 {
            Some(false)
        } else {
            None
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// As a [`Stream`], [`WakeFlag`] will produce `()` once for each time
/// [`WakeFlag::wait()`] would produce [`true`].
impl Stream for WakeFlag {
    type Item = ();

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.shared
            .poll(cx)
            .map(|alive| if alive { Some(()) } else { None })
    }
}

// -------------------------------------------------------------------------------------------------
