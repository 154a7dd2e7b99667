//! Plain cells and the read capability shared by every cell type.

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use crate::computed::Memo;
use crate::context::Graph;
use crate::equality::Equality;
use crate::error::Error;
use crate::storage::{
    listener, notify_subscribers, CellId, Listener, SubscriberRegistry, Subscription,
};
use crate::stream::Changes;
use crate::tracking::{Refresh, Source};

/// Value holder behind both [`Signal`] and [`Memo`].
///
/// Holds the current value and the subscriber registry; the only way to replace
/// the value is [`set_if_changed`](SignalCore::set_if_changed) (or the
/// always-notifying [`modify`](SignalCore::modify)).
pub(crate) struct SignalCore<T> {
    id: CellId,
    graph: Graph,
    this: Weak<SignalCore<T>>,
    value: RefCell<T>,
    equality: Equality<T>,
    subscribers: RefCell<SubscriberRegistry<T>>,
}

impl<T: 'static> SignalCore<T> {
    pub fn new(graph: Graph, value: T, equality: Equality<T>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            id: CellId::next(),
            graph,
            this: this.clone(),
            value: RefCell::new(value),
            equality,
            subscribers: RefCell::new(SubscriberRegistry::new()),
        })
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn report_usage(&self) {
        let this: Weak<dyn Source> = self.this.clone();
        self.graph.tracker().report_usage(self.id, move || this);
    }

    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value.borrow())
    }

    pub fn subscribe(&self, listener: Listener<T>) -> Subscription {
        let id = self.subscribers.borrow_mut().insert(listener);
        let this = self.this.clone();
        Subscription::new(move || {
            if let Some(core) = this.upgrade() {
                core.subscribers.borrow_mut().remove(id);
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }
}

impl<T: Clone + 'static> SignalCore<T> {
    pub fn get_untracked(&self) -> T {
        self.value.borrow().clone()
    }

    /// Store `value` and notify subscribers, unless it equals the current value.
    ///
    /// Returns whether the value changed.
    pub fn set_if_changed(&self, value: T) -> Result<bool, Error> {
        if self.equality.is_equal(&self.value.borrow(), &value) {
            return Ok(false);
        }
        let old = self.value.replace(value);
        let new = self.get_untracked();
        log::trace!("{} changed, notifying {} subscribers", self.id, self.subscriber_count());
        notify_subscribers(&self.subscribers, &new, &old)?;
        Ok(true)
    }

    /// Mutate a copy of the value, store it and notify unconditionally.
    ///
    /// No borrow is held while `f` runs, so `f` may read this cell.
    pub fn modify(&self, f: impl FnOnce(&mut T)) -> Result<(), Error> {
        let mut new = self.get_untracked();
        f(&mut new);
        let old = self.value.replace(new.clone());
        log::trace!("{} modified, notifying {} subscribers", self.id, self.subscriber_count());
        notify_subscribers(&self.subscribers, &new, &old)
    }
}

impl<T: 'static> Source for SignalCore<T> {
    fn source_id(&self) -> CellId {
        self.id
    }

    fn subscribe_source(&self, refresh: Refresh) -> Subscription {
        self.subscribe(listener(move |_, _| refresh()))
    }
}

/// A mutable reactive cell.
///
/// Reading it with [`get`](Signal::get) while a memo is evaluating makes the
/// memo depend on it. Writes that change the value notify every subscriber
/// synchronously, depth first.
///
/// ```rust,no_run
/// use reactive_graph::prelude::*;
///
/// let graph = Graph::new();
/// let count = graph.create_signal(0);
/// count.set(1).unwrap();
/// count.update(|n| n + 1).unwrap();
/// assert_eq!(count.get(), 2);
/// ```
pub struct Signal<T> {
    core: Rc<SignalCore<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<T: 'static> PartialEq for Signal<T> {
    fn eq(&self, other: &Self) -> bool {
        self.core.id() == other.core.id()
    }
}

impl<T: 'static> Eq for Signal<T> {}

impl<T: 'static> Hash for Signal<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.core.id().hash(state);
    }
}

impl Signal<bool> {
    /// Toggle the boolean value of the signal.
    pub fn toggle(&self) -> Result<bool, Error> {
        self.update(|v| !*v)
    }
}

impl<T: Clone + 'static> Signal<T> {
    pub(crate) fn new(graph: Graph, value: T, equality: Equality<T>) -> Self {
        Self {
            core: SignalCore::new(graph, value, equality),
        }
    }

    /// Get the current value, recording the read in the running derivation.
    pub fn get(&self) -> T {
        self.core.report_usage();
        self.core.get_untracked()
    }

    /// Get the current value without recording the read.
    pub fn get_untracked(&self) -> T {
        self.core.get_untracked()
    }

    /// Read the value with a closure, recording the read.
    ///
    /// The value stays borrowed while `f` runs; writing this signal from `f`
    /// panics.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.core.report_usage();
        self.core.with_untracked(f)
    }

    /// Read the value with a closure without recording the read.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.core.with_untracked(f)
    }

    /// Replace the value if it differs from the current one.
    ///
    /// Returns `Ok(true)` if subscribers were notified. An error means a memo
    /// re-evaluated by this write failed; the new value is stored regardless.
    pub fn set(&self, value: T) -> Result<bool, Error> {
        self.core.set_if_changed(value)
    }

    /// Replace the value with `transform(current)`, if that differs.
    pub fn update(&self, transform: impl FnOnce(&T) -> T) -> Result<bool, Error> {
        let value = transform(&self.core.get_untracked());
        self.core.set_if_changed(value)
    }

    /// Mutate the value in place and notify every subscriber, changed or not.
    pub fn modify(&self, f: impl FnOnce(&mut T)) -> Result<(), Error> {
        self.core.modify(f)
    }

    /// Call `observer(new, old)` after every change.
    pub fn subscribe(&self, observer: impl Fn(&T, &T) + 'static) -> Subscription {
        self.core.subscribe(listener(move |new, old| {
            observer(new, old);
            Ok(())
        }))
    }

    pub fn subscriber_count(&self) -> usize {
        self.core.subscriber_count()
    }

    pub fn id(&self) -> CellId {
        self.core.id()
    }

    pub fn read_only(&self) -> ReadOnlySignal<T> {
        ReadOnlySignal {
            inner: ReadOnlyInner::Signal(self.clone()),
        }
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id())
            .field("value", &self.get_untracked())
            .finish()
    }
}

/// Anything that can be read and observed: [`Signal`], [`Memo`] and
/// [`ReadOnlySignal`].
pub trait Readable<T: Clone + 'static> {
    fn cell_id(&self) -> CellId;

    /// Read the value, recording the read in the running derivation.
    fn read(&self) -> Result<T, Error>;

    fn read_untracked(&self) -> Result<T, Error>;

    /// Call `observer(new, old)` after every change.
    fn observe(&self, observer: impl Fn(&T, &T) + 'static) -> Result<Subscription, Error>
    where
        Self: Sized;

    /// Stream of every new value, starting with the next change.
    fn changes(&self) -> Result<Changes<T>, Error>
    where
        Self: Sized,
    {
        Changes::new(self)
    }
}

impl<T: Clone + 'static> Readable<T> for Signal<T> {
    fn cell_id(&self) -> CellId {
        self.id()
    }

    fn read(&self) -> Result<T, Error> {
        Ok(self.get())
    }

    fn read_untracked(&self) -> Result<T, Error> {
        Ok(self.get_untracked())
    }

    fn observe(&self, observer: impl Fn(&T, &T) + 'static) -> Result<Subscription, Error> {
        Ok(self.subscribe(observer))
    }
}

#[derive(Clone)]
enum ReadOnlyInner<T> {
    Signal(Signal<T>),
    Memo(Memo<T>),
}

/// A read-only view of a signal or memo.
///
/// This prevents accidental mutations while still allowing reads and subscriptions.
#[derive(Clone)]
pub struct ReadOnlySignal<T> {
    inner: ReadOnlyInner<T>,
}

impl<T: Clone + 'static> ReadOnlySignal<T> {
    pub(crate) fn from_memo(memo: Memo<T>) -> Self {
        Self {
            inner: ReadOnlyInner::Memo(memo),
        }
    }

    /// Get the current value, recording the read.
    pub fn get(&self) -> Result<T, Error> {
        match &self.inner {
            ReadOnlyInner::Signal(signal) => Ok(signal.get()),
            ReadOnlyInner::Memo(memo) => memo.get(),
        }
    }

    /// Get the current value without recording the read.
    pub fn get_untracked(&self) -> Result<T, Error> {
        match &self.inner {
            ReadOnlyInner::Signal(signal) => Ok(signal.get_untracked()),
            ReadOnlyInner::Memo(memo) => memo.get_untracked(),
        }
    }

    /// Subscribe to changes of the underlying cell.
    pub fn subscribe(&self, observer: impl Fn(&T, &T) + 'static) -> Result<Subscription, Error> {
        match &self.inner {
            ReadOnlyInner::Signal(signal) => Ok(signal.subscribe(observer)),
            ReadOnlyInner::Memo(memo) => memo.subscribe(observer),
        }
    }

    pub fn id(&self) -> CellId {
        match &self.inner {
            ReadOnlyInner::Signal(signal) => signal.id(),
            ReadOnlyInner::Memo(memo) => memo.id(),
        }
    }
}

impl<T: Clone + 'static> Readable<T> for ReadOnlySignal<T> {
    fn cell_id(&self) -> CellId {
        self.id()
    }

    fn read(&self) -> Result<T, Error> {
        self.get()
    }

    fn read_untracked(&self) -> Result<T, Error> {
        self.get_untracked()
    }

    fn observe(&self, observer: impl Fn(&T, &T) + 'static) -> Result<Subscription, Error> {
        self.subscribe(observer)
    }
}

impl<T: 'static> fmt::Debug for ReadOnlySignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.inner {
            ReadOnlyInner::Signal(_) => "signal",
            ReadOnlyInner::Memo(_) => "memo",
        };
        f.debug_struct("ReadOnlySignal").field("kind", &kind).finish()
    }
}
