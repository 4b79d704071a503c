//! Tests of [`Store`] mutation, notification, and lifecycle.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use statebox::{batch, Listener, Log, Resolved, State, Store, StoreOptions, Update};
use tracing_test::traced_test;

use crate::tools::{count, isolated_store, Counter};

// -------------------------------------------------------------------------------------------------

#[test]
fn unchanged_snapshot_is_shared() {
    let store = isolated_store("s", count(0));
    let a = store.get_state().unwrap();
    store.patch(count(0));
    let b = store.get_state().unwrap();
    assert!(Rc::ptr_eq(&a, &b));
    assert_eq!(store.version(), 0);

    store.patch(count(1));
    let c = store.get_state().unwrap();
    assert!(!Rc::ptr_eq(&a, &c));
    assert_eq!(*a, count(0), "old snapshot must not change");
    assert_eq!(*c, count(1));
    assert_eq!(store.version(), 1);
}

#[test]
fn no_op_patch_does_not_notify() {
    let store = isolated_store("s", count(0));
    let log = Log::new();
    let _s = store.subscribe(log.listener()).unwrap();
    store.patch(count(0));
    store.set_state(Update::Patch(BTreeMap::new()));
    assert_eq!(log.drain(), vec![]);
}

#[test]
fn change_notifies_with_next_and_prev() {
    let store = isolated_store("s", count(0));
    let log = Log::new();
    let _s = store.subscribe(log.listener()).unwrap();
    store.patch(count(1));
    assert_eq!(log.drain(), vec![(count(1), count(0))]);
}

#[test]
fn patch_merges_and_replace_discards() {
    let store = isolated_store("s", BTreeMap::from([("a", 1), ("b", 2)]));
    store.patch(BTreeMap::from([("b", 3)]));
    assert_eq!(*store.get_state().unwrap(), BTreeMap::from([("a", 1), ("b", 3)]));
    store.replace(BTreeMap::from([("c", 4)]));
    assert_eq!(*store.get_state().unwrap(), BTreeMap::from([("c", 4)]));
}

#[test]
fn update_function_sees_current_state() {
    let store = isolated_store("s", count(5));
    store.update(|s: &Counter| Resolved::Patch(count(s["count"] * 2)));
    assert_eq!(*store.get_state().unwrap(), count(10));
    store.update(|s: &Counter| Resolved::Replace(BTreeMap::from([("total", s["count"])])));
    assert_eq!(*store.get_state().unwrap(), BTreeMap::from([("total", 10)]));
}

#[test]
fn batch_coalesces_into_one_notification() {
    let store = Store::new(count(0));
    let log = Log::new();
    let _s = store.subscribe(log.listener()).unwrap();
    batch(|| {
        store.patch(count(1));
        store.patch(count(2));
        store.patch(count(3));
        assert_eq!(log.drain(), vec![]);
    });
    assert_eq!(log.drain(), vec![(count(3), count(0))]);
    assert_eq!(store.version(), 3);
}

#[test]
fn nested_batches_notify_once_at_outermost() {
    let store = Store::new(count(0));
    let log = Log::new();
    let _s = store.subscribe(log.listener()).unwrap();
    batch(|| {
        store.patch(count(1));
        batch(|| store.patch(count(2)));
        assert_eq!(log.drain(), vec![]);
        store.patch(count(3));
    });
    assert_eq!(log.drain(), vec![(count(3), count(0))]);
}

#[test]
fn window_returning_to_start_still_notifies() {
    let store = Store::new(count(0));
    let log = Log::new();
    let _s = store.subscribe(log.listener()).unwrap();
    batch(|| {
        store.patch(count(1));
        store.patch(count(0));
    });
    assert_eq!(log.drain(), vec![(count(0), count(0))]);
}

#[test]
fn batch_defers_unrelated_stores_on_same_scheduler() {
    let a = Store::new(count(0));
    let b = Store::new(count(0));
    let isolated = isolated_store("isolated", count(0));
    let (log_a, log_b, log_isolated) = (Log::new(), Log::new(), Log::new());
    let _sa = a.subscribe(log_a.listener()).unwrap();
    let _sb = b.subscribe(log_b.listener()).unwrap();
    let _si = isolated.subscribe(log_isolated.listener()).unwrap();

    batch(|| {
        a.patch(count(1));
        b.patch(count(2));
        isolated.patch(count(3));
        assert_eq!(log_b.drain(), vec![]);
        assert_eq!(log_isolated.drain(), vec![(count(3), count(0))]);
    });
    assert_eq!(log_a.drain(), vec![(count(1), count(0))]);
    assert_eq!(log_b.drain(), vec![(count(2), count(0))]);
}

#[test]
fn listeners_called_in_subscription_order() {
    let store = isolated_store("s", count(0));
    let order = Rc::new(RefCell::new(Vec::new()));
    let subscriptions: Vec<_> = ["first", "second", "third"]
        .into_iter()
        .map(|label| {
            let order = order.clone();
            store
                .subscribe(move |_: &Counter, _: &Counter| order.borrow_mut().push(label))
                .unwrap()
        })
        .collect();
    store.patch(count(1));
    assert_eq!(*order.borrow(), ["first", "second", "third"]);

    subscriptions[1].unsubscribe();
    store.patch(count(2));
    assert_eq!(
        *order.borrow(),
        ["first", "second", "third", "first", "third"]
    );
}

#[test]
fn same_listener_twice_is_two_registrations() {
    let store = isolated_store("s", count(0));
    let log = Log::new();
    let first = store.subscribe(log.listener()).unwrap();
    let second = store.subscribe(log.listener()).unwrap();
    assert_eq!(store.listener_count(), 2);

    store.patch(count(1));
    assert_eq!(log.drain().len(), 2);

    assert_eq!(first.unsubscribe(), true);
    assert_eq!(store.listener_count(), 1);
    store.patch(count(2));
    assert_eq!(log.drain(), vec![(count(2), count(1))]);
    drop(second);
}

#[test]
fn unsubscribe_is_idempotent() {
    let store = isolated_store("s", count(0));
    let subscription = store.subscribe(|_: &Counter, _: &Counter| {}).unwrap();
    assert_eq!(store.listener_count(), 1);
    assert_eq!(subscription.unsubscribe(), true);
    assert_eq!(subscription.unsubscribe(), false);
    assert_eq!(store.listener_count(), 0);
}

#[test]
fn dropping_subscription_handle_keeps_listener() {
    let store = isolated_store("s", count(0));
    let log = Log::new();
    drop(store.subscribe(log.listener()).unwrap());
    store.patch(count(1));
    assert_eq!(log.drain(), vec![(count(1), count(0))]);
}

#[test]
fn unsubscribed_during_flush_is_skipped() {
    let store = isolated_store("s", count(0));
    let log = Log::new();
    let victim: Rc<RefCell<Option<statebox::Unsubscribe>>> = Rc::default();
    let victim2 = victim.clone();
    let _first = store
        .subscribe(move |_: &Counter, _: &Counter| {
            if let Some(subscription) = victim2.borrow_mut().take() {
                subscription.unsubscribe();
            }
        })
        .unwrap();
    *victim.borrow_mut() = Some(store.subscribe(log.listener()).unwrap());

    store.patch(count(1));
    assert_eq!(log.drain(), vec![]);
    assert_eq!(store.listener_count(), 1);
}

#[test]
fn subscribed_during_flush_waits_for_next_flush() {
    let store = isolated_store("s", count(0));
    let log = Log::new();
    let pending = Rc::new(RefCell::new(Some(log.listener())));
    let late: Rc<RefCell<Vec<statebox::Unsubscribe>>> = Rc::default();
    let (store2, pending2, late2) = (store.clone(), pending.clone(), late.clone());
    let first = store
        .subscribe(move |_: &Counter, _: &Counter| {
            if let Some(listener) = pending2.borrow_mut().take() {
                late2.borrow_mut().push(store2.subscribe(listener).unwrap());
            }
        })
        .unwrap();

    store.patch(count(1));
    assert_eq!(log.drain(), vec![]);
    store.patch(count(2));
    assert_eq!(log.drain(), vec![(count(2), count(1))]);

    first.unsubscribe();
}

#[test]
fn mutation_during_flush_is_delivered_after_it() {
    let store = isolated_store("s", count(0));
    let order = Rc::new(RefCell::new(Vec::new()));

    let (store2, order2) = (store.clone(), order.clone());
    let first = store
        .subscribe(move |next: &Counter, prev: &Counter| {
            order2
                .borrow_mut()
                .push(("first", next["count"], prev["count"]));
            if next["count"] == 1 {
                store2.patch(count(2));
            }
        })
        .unwrap();
    let order3 = order.clone();
    let _second = store
        .subscribe(move |next: &Counter, prev: &Counter| {
            order3
                .borrow_mut()
                .push(("second", next["count"], prev["count"]));
        })
        .unwrap();

    store.patch(count(1));
    assert_eq!(
        *order.borrow(),
        [
            ("first", 1, 0),
            ("second", 1, 0),
            ("first", 2, 1),
            ("second", 2, 1),
        ]
    );
    first.unsubscribe();
}

#[test]
fn panicking_listener_does_not_stop_others() {
    let store = isolated_store("s", count(0));
    let log = Log::new();
    let _bad = store
        .subscribe(|_: &Counter, _: &Counter| panic!("listener failure"))
        .unwrap();
    let _good = store.subscribe(log.listener()).unwrap();
    store.patch(count(1));
    assert_eq!(log.drain(), vec![(count(1), count(0))]);
    assert_eq!(*store.get_state().unwrap(), count(1));
}

#[test]
fn panicking_update_leaves_state_unchanged() {
    let store = isolated_store("s", count(0));
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        store.update(|_: &Counter| panic!("update failure"));
    }));
    assert!(result.is_err());
    assert_eq!(*store.get_state().unwrap(), count(0));
    assert_eq!(store.version(), 0);
}

#[test]
fn custom_equality_controls_notification() {
    let store = Store::with_options(
        count(0),
        StoreOptions::new()
            .name("parity")
            .equality(|a: &Counter, b: &Counter| a["count"] % 2 == b["count"] % 2)
            .scheduler(statebox::BatchScheduler::new()),
    );
    let log = Log::new();
    let _s = store.subscribe(log.listener()).unwrap();
    store.patch(count(2));
    assert_eq!(log.drain(), vec![]);
    assert_eq!(*store.get_state().unwrap(), count(0));
    store.patch(count(3));
    assert_eq!(log.drain(), vec![(count(3), count(0))]);
}

type Items = BTreeMap<&'static str, Rc<Vec<i32>>>;

#[test]
fn map_value_in_new_allocation_is_a_change() {
    let items = Rc::new(vec![1, 2, 3]);
    let store = Store::with_options(
        Items::from([("items", items.clone())]),
        StoreOptions::new().scheduler(statebox::BatchScheduler::new()),
    );
    let changes = Rc::new(Cell::new(0));
    let changes2 = changes.clone();
    let _s = store
        .subscribe(move |_: &Items, _: &Items| {
            changes2.set(changes2.get() + 1);
        })
        .unwrap();

    store.patch(BTreeMap::from([("items", items)]));
    assert_eq!((store.version(), changes.get()), (0, 0));

    store.patch(BTreeMap::from([("items", Rc::new(vec![1, 2, 3]))]));
    assert_eq!((store.version(), changes.get()), (1, 1));
}

// -------------------------------------------------------------------------------------------------

#[test]
fn destroy_releases_everything() {
    struct DropCounter(Rc<Cell<u32>>);
    impl Listener<Counter> for DropCounter {
        fn receive(&self, _: &Counter, _: &Counter) {}
    }
    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    let store = isolated_store("doomed", count(0));
    let drops = Rc::new(Cell::new(0));
    let subscription = store.subscribe(DropCounter(drops.clone())).unwrap();
    let _other = store.subscribe(DropCounter(drops.clone())).unwrap();

    store.destroy();
    assert_eq!(drops.get(), 2);
    assert_eq!(store.listener_count(), 0);
    assert!(store.is_destroyed());
    assert_eq!(subscription.unsubscribe(), false);

    store.destroy();
    assert!(store.is_destroyed());
}

#[test]
fn destroyed_store_rejects_reads() {
    let store = isolated_store("doomed", count(0));
    store.destroy();
    assert_eq!(
        store.get_state().unwrap_err().to_string(),
        r#"store "doomed" was destroyed; cannot read state"#
    );
    assert_eq!(
        store
            .subscribe(|_: &Counter, _: &Counter| {})
            .unwrap_err()
            .to_string(),
        r#"store "doomed" was destroyed; cannot subscribe"#
    );
    let selector = statebox::Selector::new(|s: &Counter| s["count"]);
    assert_eq!(
        store.select(&selector).unwrap_err().to_string(),
        r#"store "doomed" was destroyed; cannot select"#
    );
}

#[test]
#[traced_test]
fn destroyed_store_ignores_writes() {
    let store = isolated_store("doomed", count(0));
    store.destroy();
    store.patch(count(1));
    assert_eq!(store.version(), 0);
    assert!(logs_contain("ignoring set_state on destroyed store"));
    assert!(logs_contain("doomed"));
}

#[test]
fn destroy_inside_batch_discards_notification() {
    let store = Store::new(count(0));
    let log = Log::new();
    let _s = store.subscribe(log.listener()).unwrap();
    batch(|| {
        store.patch(count(1));
        store.destroy();
    });
    assert_eq!(log.drain(), vec![]);
}

#[test]
fn listener_may_destroy_store() {
    let store = isolated_store("s", count(0));
    let log = Log::new();
    let store2 = store.clone();
    let _first = store
        .subscribe(move |_: &Counter, _: &Counter| store2.destroy())
        .unwrap();
    let _second = store.subscribe(log.listener()).unwrap();
    store.patch(count(1));
    assert!(store.is_destroyed());
    assert_eq!(log.drain(), vec![]);
}

// -------------------------------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
struct Document {
    title: Rc<str>,
    words: Rc<Vec<String>>,
}

#[derive(Default)]
struct DocumentPatch {
    title: Option<Rc<str>>,
    words: Option<Rc<Vec<String>>>,
}

impl State for Document {
    type Patch = DocumentPatch;

    fn merge(&mut self, patch: DocumentPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(words) = patch.words {
            self.words = words;
        }
    }

    fn shallow_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.title, &other.title) && Rc::ptr_eq(&self.words, &other.words)
    }
}

#[test]
fn struct_state_uses_shallow_equality() {
    let words = Rc::new(vec![String::from("hello")]);
    let store = isolated_store_of(Document {
        title: Rc::from("draft"),
        words: words.clone(),
    });
    let changes = Rc::new(Cell::new(0));
    let changes2 = changes.clone();
    let _s = store
        .subscribe(move |_: &Document, _: &Document| changes2.set(changes2.get() + 1))
        .unwrap();

    // Same pointer: unchanged.
    store.patch(DocumentPatch {
        words: Some(words.clone()),
        ..DocumentPatch::default()
    });
    assert_eq!(changes.get(), 0);

    // Equal contents in a new allocation: changed, since nested values are not compared.
    store.patch(DocumentPatch {
        words: Some(Rc::new(vec![String::from("hello")])),
        ..DocumentPatch::default()
    });
    assert_eq!(changes.get(), 1);
    assert_eq!(&*store.get_state().unwrap().title, "draft");
}

fn isolated_store_of<T: State>(initial: T) -> Store<T> {
    Store::with_options(
        initial,
        StoreOptions::new().scheduler(statebox::BatchScheduler::new()),
    )
}

#[test]
fn store_debug() {
    let store = isolated_store("counter", count(7));
    store.patch(count(8));
    let _s = store.subscribe(|_: &Counter, _: &Counter| {}).unwrap();
    assert_eq!(
        format!("{store:?}"),
        r#"Store { name: "counter", version: 1, state: {"count": 8}, listeners: 1, destroyed: false }"#
    );
    store.destroy();
    assert_eq!(
        format!("{store:?}"),
        r#"Store { name: "counter", version: 1, state: {"count": 8}, listeners: 0, destroyed: true }"#
    );
}
