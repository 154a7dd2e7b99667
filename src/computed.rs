//! Memos: cells whose value is derived from other cells.
//!
//! A memo starts out lazy. While nobody subscribes to it, every read runs the
//! derivation again and records which cells it read, but holds no
//! subscriptions on them. The first subscriber switches it to listening mode:
//! it re-evaluates once, subscribes to every dependency and from then on is
//! kept current by its dependencies' change notifications. When the last
//! subscriber leaves, the upstream subscriptions are released again while the
//! last known value and dependency set are kept.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::context::Graph;
use crate::equality::Equality;
use crate::error::{DerivationError, Error};
use crate::signal::{ReadOnlySignal, Readable, SignalCore};
use crate::storage::{listener, CellId, Listener, Subscription};
use crate::tracking::{Dependencies, Refresh, Source};

type Derivation<T> = Box<dyn Fn() -> anyhow::Result<T>>;

/// Configuration for [`SignalContext::create_memo_with`](crate::SignalContext::create_memo_with).
pub struct MemoOptions<T> {
    label: Option<Arc<str>>,
    equality: Equality<T>,
}

impl<T: PartialEq + 'static> MemoOptions<T> {
    pub fn new() -> Self {
        Self::with_equality(Equality::partial_eq())
    }
}

impl<T: PartialEq + 'static> Default for MemoOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> MemoOptions<T> {
    pub fn with_equality(equality: Equality<T>) -> Self {
        Self {
            label: None,
            equality,
        }
    }

    /// Name reported in errors raised by this memo's derivation.
    pub fn label(mut self, label: impl Into<Arc<str>>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Predicate deciding whether a re-evaluation produced a new value.
    pub fn equality(mut self, equality: Equality<T>) -> Self {
        self.equality = equality;
        self
    }

    pub(crate) fn into_parts(self) -> (Option<Arc<str>>, Equality<T>) {
        (self.label, self.equality)
    }
}

/// Clears the re-entrancy flag when evaluation ends, however it ends.
struct Evaluating<'a>(&'a Cell<bool>);

impl Drop for Evaluating<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

pub(crate) struct MemoInner<T> {
    this: Weak<MemoInner<T>>,
    graph: Graph,
    label: Arc<str>,
    derivation: Derivation<T>,
    /// `None` until the first successful evaluation.
    value: Rc<SignalCore<Option<T>>>,
    refreshing: Cell<bool>,
    listening: Cell<bool>,
    dependencies: RefCell<Dependencies>,
}

impl<T: Clone + 'static> MemoInner<T> {
    fn id(&self) -> CellId {
        self.value.id()
    }

    fn report_usage(&self) {
        let this: Weak<dyn Source> = self.this.clone();
        self.graph.tracker().report_usage(self.id(), move || this);
    }

    fn get_untracked(&self) -> Result<T, Error> {
        if self.listening.get() {
            if let Some(value) = self.value.get_untracked() {
                return Ok(value);
            }
        }
        self.refresh()
    }

    /// Re-run the derivation, reconcile dependencies and store the result.
    ///
    /// Dependencies are reconciled even when the derivation fails, so a
    /// listening memo hears about changes to whatever it read before failing.
    fn refresh(&self) -> Result<T, Error> {
        if self.refreshing.replace(true) {
            log::warn!("circular dependency detected while evaluating {}", self.label);
            return Err(Error::CircularDependency);
        }

        log::trace!("evaluating {} ({})", self.label, self.id());
        let (evaluated, foreign_read) = {
            let _evaluating = Evaluating(&self.refreshing);
            let (evaluated, recorded) = self
                .graph
                .tracker()
                .track_dependencies(|| (self.derivation)());
            self.update_dependencies(recorded.dependencies);
            (evaluated, recorded.foreign_read)
        };
        let evaluated = match foreign_read {
            Some(cell) => Err(anyhow::Error::new(Error::ForeignRead(cell))),
            None => evaluated,
        };
        let value = evaluated.map_err(|failure| {
            Error::Derivation(DerivationError::from_failure(self.label.clone(), failure))
        })?;

        self.value.set_if_changed(Some(value.clone()))?;
        Ok(value)
    }

    /// Reconcile the held dependency set with the one just recorded.
    fn update_dependencies(&self, mut fresh: Dependencies) {
        // A memo reading itself has already failed as circular.
        fresh.remove(&self.id());
        let mut current = std::mem::take(&mut *self.dependencies.borrow_mut());

        let mut released = Vec::new();
        current.retain(|id, dependency| {
            if fresh.contains_key(id) {
                return true;
            }
            released.extend(dependency.take_subscription());
            false
        });
        let dropped = released.len();
        let before = current.len();
        for (id, dependency) in fresh {
            current.entry(id).or_insert(dependency);
        }
        let added = current.len() - before;

        if self.listening.get() {
            let refresh = self.refresh_callback();
            for dependency in current.values_mut() {
                dependency.subscribe(&refresh);
            }
        }
        *self.dependencies.borrow_mut() = current;

        for subscription in released {
            subscription.unsubscribe();
        }
        if added > 0 || dropped > 0 {
            log::debug!(
                "{} dependencies changed: +{added} -{dropped}",
                self.label
            );
        }
    }

    /// Callback handed to dependencies; re-evaluates this memo if it still exists.
    fn refresh_callback(&self) -> Refresh {
        let this = self.this.clone();
        Rc::new(move || match this.upgrade() {
            Some(inner) => inner.refresh().map(drop),
            None => Ok(()),
        })
    }

    /// Register `listener`, switching to listening mode on the first one.
    ///
    /// The switch forces an evaluation; its outcome is returned next to the
    /// subscription, which stays registered either way.
    fn attach(&self, listener: Listener<Option<T>>) -> (Subscription, Result<(), Error>) {
        let subscription = self.value.subscribe(listener);
        let mut forced = Ok(());
        if !self.listening.get() {
            self.listening.set(true);
            log::debug!("{} is now listening", self.label);
            forced = self.refresh().map(drop);
        }

        // A live subscription keeps the memo alive.
        let this = self.this.upgrade();
        let subscription = Subscription::new(move || {
            subscription.unsubscribe();
            if let Some(inner) = this {
                inner.stop_if_unobserved();
            }
        });
        (subscription, forced)
    }

    fn stop_if_unobserved(&self) {
        if self.value.subscriber_count() > 0 || !self.listening.get() {
            return;
        }
        self.listening.set(false);
        log::debug!("{} stopped listening", self.label);

        let subscriptions: Vec<Subscription> = self
            .dependencies
            .borrow_mut()
            .values_mut()
            .filter_map(|dependency| dependency.take_subscription())
            .collect();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
    }

    fn dependency_count(&self) -> usize {
        self.dependencies.borrow().len()
    }

    fn active_dependency_count(&self) -> usize {
        self.dependencies
            .borrow()
            .values()
            .filter(|dependency| dependency.is_subscribed())
            .count()
    }
}

impl<T: Clone + 'static> Source for MemoInner<T> {
    fn source_id(&self) -> CellId {
        self.id()
    }

    fn subscribe_source(&self, refresh: Refresh) -> Subscription {
        let (subscription, forced) = self.attach(listener(move |_, _| refresh()));
        if let Err(err) = forced {
            log::debug!("{} is listening without a value: {err}", self.label);
        }
        subscription
    }
}

impl<T> Drop for MemoInner<T> {
    fn drop(&mut self) {
        let dependencies = std::mem::take(self.dependencies.get_mut());
        for (_, mut dependency) in dependencies {
            if let Some(subscription) = dependency.take_subscription() {
                subscription.unsubscribe();
            }
        }
    }
}

/// A derived cell.
///
/// Created through [`SignalContext`](crate::SignalContext). Reading a memo that
/// has no subscribers evaluates its derivation on the spot; a memo with
/// subscribers is kept current and reads return the stored value.
///
/// ```rust,no_run
/// use reactive_graph::prelude::*;
///
/// let graph = Graph::new();
/// let count = graph.create_signal(5);
/// let doubled = graph.create_memo({
///     let count = count.clone();
///     move || count.get() * 2
/// });
/// assert_eq!(doubled.get().unwrap(), 10);
/// ```
pub struct Memo<T> {
    inner: Rc<MemoInner<T>>,
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> PartialEq for Memo<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Eq for Memo<T> {}

impl<T> Hash for Memo<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Rc::as_ptr(&self.inner).hash(state);
    }
}

impl<T: Clone + 'static> Memo<T> {
    pub(crate) fn new(
        graph: Graph,
        label: Arc<str>,
        equality: Equality<T>,
        derivation: Derivation<T>,
    ) -> Self {
        let value = SignalCore::new(graph.clone(), None, equality.lift_option());
        let inner = Rc::new_cyclic(|this| MemoInner {
            this: this.clone(),
            graph,
            label,
            derivation,
            value,
            refreshing: Cell::new(false),
            listening: Cell::new(false),
            dependencies: RefCell::new(Dependencies::new()),
        });
        Self { inner }
    }

    /// Get the current value, recording the read in the running derivation.
    ///
    /// Evaluates the derivation unless the memo is listening and already
    /// holds a value.
    pub fn get(&self) -> Result<T, Error> {
        self.inner.report_usage();
        self.inner.get_untracked()
    }

    /// Like [`get`](Memo::get) without recording the read.
    pub fn get_untracked(&self) -> Result<T, Error> {
        self.inner.get_untracked()
    }

    /// Call `observer(new, old)` whenever the derived value changes.
    ///
    /// The first subscriber makes the memo evaluate and start listening to its
    /// dependencies; if that evaluation fails the subscription is not kept.
    pub fn subscribe(&self, observer: impl Fn(&T, &T) + 'static) -> Result<Subscription, Error> {
        let (subscription, forced) =
            self.inner
                .attach(listener(move |new: &Option<T>, old: &Option<T>| {
                    if let (Some(new), Some(old)) = (new, old) {
                        observer(new, old);
                    }
                    Ok(())
                }));
        if let Err(err) = forced {
            subscription.unsubscribe();
            return Err(err);
        }
        Ok(subscription)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.value.subscriber_count()
    }

    /// Number of distinct cells read by the last evaluation.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependency_count()
    }

    /// Number of dependencies this memo currently holds a subscription on.
    pub fn active_dependency_count(&self) -> usize {
        self.inner.active_dependency_count()
    }

    /// Whether the memo is kept current by its dependencies.
    pub fn is_listening(&self) -> bool {
        self.inner.listening.get()
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn id(&self) -> CellId {
        self.inner.id()
    }

    pub fn read_only(&self) -> ReadOnlySignal<T> {
        ReadOnlySignal::from_memo(self.clone())
    }
}

impl<T: Clone + 'static> Readable<T> for Memo<T> {
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

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("label", &self.label())
            .field("listening", &self.is_listening())
            .field("value", &self.inner.value.get_untracked())
            .finish()
    }
}
