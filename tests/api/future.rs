use std::cell::Cell;
use std::future::Future as _;
use std::pin::pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::task::noop_waker_ref; // TODO: we can replace this with Waker::noop() when MSRV is Rust 1.85
use futures::StreamExt as _;

use statebox::batch;
use statebox::future::WakeFlag;

use crate::tools::{count, isolated_store, run_task_without_waiting, yield_now};

// -------------------------------------------------------------------------------------------------

#[test]
fn wake_flag_coalesces_changes() {
    let ctx = &mut Context::from_waker(noop_waker_ref());
    let store = isolated_store("s", count(0));
    let mut flag = WakeFlag::listening(false, &store).unwrap();

    store.patch(count(1));
    store.patch(count(2));
    assert_eq!(pin!(flag.wait()).as_mut().poll(ctx), Poll::Ready(true));
    assert_eq!(pin!(flag.wait()).as_mut().poll(ctx), Poll::Pending);
}

#[test]
fn wake_flag_task_exits_when_store_destroyed() {
    let store = isolated_store("s", count(0));
    let mut flag = WakeFlag::listening(true, &store).unwrap();
    let wakeups = Rc::new(Cell::new(0));
    let wakeups2 = wakeups.clone();
    let store2 = store.clone();
    run_task_without_waiting(async move {
        let writer = async {
            store2.patch(count(1));
            yield_now().await;
            store2.destroy();
        };
        let reader = async {
            while flag.wait().await {
                wakeups2.set(wakeups2.get() + 1);
            }
        };
        futures::join!(reader, writer);
    });
    // Once for the initial wake, once for the change.
    assert_eq!(wakeups.get(), 2);
}

#[test]
fn wake_flag_as_stream() {
    let store = isolated_store("s", count(0));
    let flag = WakeFlag::listening(false, &store).unwrap();
    let store2 = store.clone();
    run_task_without_waiting(async move {
        batch(|| {
            store2.patch(count(1));
            store2.patch(count(2));
        });
        store2.destroy();
        let items: Vec<()> = flag.collect().await;
        assert_eq!(items, vec![()]);
    });
}
