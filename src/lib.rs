//! Observable state containers with transactional, coalescing change notification.
//!
//! # What `statebox` does
//!
//! A [`Store`] holds a value which changes over time, and calls its [`Listener`]s when it
//! does. Three things distinguish it from plain event-listener registration:
//!
//! * Changes which its equality function considers no change are dropped silently, so
//!   listeners never hear about a write that did not alter anything.
//!
//! * Changes made inside a [`batch()`] are coalesced: however many mutations happen, each
//!   listener is called once when the outermost batch closes, with the final state and the
//!   state from before the first mutation. Batches nest, and may also span an `await` via
//!   [`batch_async()`].
//!
//! * Derived values are computed through [`Selector`]s and memoized by
//!   [`Store::select()`] until the next change, in a bounded least-recently-used cache.
//!
//! Notifications are delivered synchronously, on the thread that made the change (or that
//! closed the batch); there is no background task or executor involved. The deferral
//! machinery lives in [`BatchScheduler`], which every store on a thread shares unless given
//! its own.
//!
//! # Getting started
//!
//! * Pick a state type implementing [`State`]. Maps such as
//!   [`BTreeMap`](std::collections::BTreeMap) implement it already, with a patch being a
//!   map of entries to insert; for a struct, implement it yourself.
//!
//! * Create a [`Store`] with [`Store::new()`] or, to configure it, [`Store::with_options()`].
//!
//! * Register listeners with [`Store::subscribe()`]. Any `Fn(&T, &T)` closure is a listener;
//!   [`Log`] and [`Flag`] are ready-made ones.
//!
//! * Change the state with [`Store::patch()`], [`Store::replace()`], [`Store::update()`], or
//!   the general [`Store::set_state()`].
//!
//! # Features
//!
//! The following Cargo feature flags are defined:
//!
//! * `"async"`:
//!   Add functionality for `async` programming,
//!   currently consisting of the
#![cfg_attr(feature = "async", doc = "[`future`]")]
#![cfg_attr(not(feature = "async"), doc = "`future`")]
//! module.
//!
//! [`batch_async()`] is available regardless, since it only needs [`core::future::Future`].
//!
//! # Diagnostics
//!
//! `statebox` reports through [`tracing`]: state changes and lifecycle events at `DEBUG`,
//! cache activity at `TRACE`, and panics caught from listeners and batched callbacks at
//! `ERROR`. Install a `tracing` subscriber to see them.
//!
//! # Limitations
//!
//! * Stores, schedulers, and selectors are not [`Send`] or [`Sync`]. Each thread has its own
//!   default [`BatchScheduler`], and a batch on one thread has no effect on stores used from
//!   another.
//!
//! * Listeners which hold a clone of the store they are subscribed to form a reference cycle,
//!   which is broken only by [`Store::destroy()`].
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(explicit_outlives_requirements)]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![warn(redundant_lifetimes)]
#![warn(trivial_casts)]
#![warn(trivial_numeric_casts)]
#![warn(unnameable_types)]
#![warn(unused_extern_crates)]
#![warn(unused_lifetimes)]
#![warn(unreachable_pub)]
#![warn(clippy::assigning_clones)]
#![warn(clippy::doc_markdown)]
#![warn(clippy::exhaustive_enums)]
#![warn(clippy::exhaustive_structs)]
#![warn(clippy::inconsistent_struct_constructor)]
#![warn(clippy::large_futures)]
#![warn(clippy::large_stack_frames)]
#![warn(clippy::manual_let_else)]
#![warn(clippy::missing_panics_doc)]
#![warn(clippy::pedantic)]
#![warn(clippy::return_self_not_must_use)]
#![warn(clippy::should_panic_without_expect)]
#![warn(clippy::unnecessary_self_imports)]
#![warn(clippy::unnecessary_wraps)]
#![allow(clippy::bool_assert_comparison, reason = "less legible")]
#![allow(clippy::explicit_auto_deref)]
#![allow(clippy::explicit_iter_loop)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::semicolon_if_nothing_returned, reason = "explicit delegation")]

// -------------------------------------------------------------------------------------------------

mod error;
pub use error::DestroyedAccess;

#[cfg(feature = "async")]
pub mod future;

mod listener;
pub use listener::Listener;

mod scheduler;
pub use scheduler::{batch, batch_async, is_batching, schedule_batch, BatchGuard, BatchScheduler};

mod selector;
pub use selector::{Selector, SelectorId};

mod selector_cache;

mod simple_listeners;
pub use simple_listeners::{Flag, FlagListener, Log, LogListener};

mod state;
pub use state::{Resolved, ShallowEq, Snapshot, State, Update};

mod store;
pub use store::{Store, StoreOptions, Unsubscribe};

mod util;
