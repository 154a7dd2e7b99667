//! The graph that cells are created in.
//!
//! A [`Graph`] owns the dependency tracking stack. Every cell keeps a handle to
//! the graph it was created in, so reads are attributed to derivations running
//! in the same graph. Separate graphs are fully independent.

use std::any::type_name;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::computed::{Memo, MemoOptions};
use crate::equality::Equality;
use crate::signal::Signal;
use crate::tracking::Tracker;

/// Handle to a reactive graph. Cloning is cheap; clones share the same stack.
#[derive(Clone, Default)]
pub struct Graph {
    tracker: Rc<Tracker>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a derivation is currently being evaluated in this graph.
    pub fn is_tracking(&self) -> bool {
        self.tracker.is_tracking()
    }

    /// Number of derivations currently being evaluated, innermost included.
    pub fn tracking_depth(&self) -> usize {
        self.tracker.depth()
    }

    pub(crate) fn tracker(&self) -> &Tracker {
        &self.tracker
    }
}

impl PartialEq for Graph {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.tracker, &other.tracker)
    }
}

impl Eq for Graph {}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("tracking_depth", &self.tracking_depth())
            .finish()
    }
}

/// Factory methods for cells.
///
/// # Example
///
/// ```rust,no_run
/// use reactive_graph::prelude::*;
///
/// let graph = Graph::new();
/// let first = graph.create_signal("Jane".to_string());
/// let last = graph.create_signal("Doe".to_string());
///
/// let full = graph.create_memo({
///     let first = first.clone();
///     let last = last.clone();
///     move || format!("{} {}", first.get(), last.get())
/// });
///
/// assert_eq!(full.get().unwrap(), "Jane Doe");
/// ```
pub trait SignalContext {
    /// Create a plain cell compared with `PartialEq`.
    fn create_signal<T: Clone + PartialEq + 'static>(&self, initial: T) -> Signal<T>;

    /// Create a plain cell with a custom equality predicate.
    fn create_signal_with<T: Clone + 'static>(&self, initial: T, equality: Equality<T>)
        -> Signal<T>;

    /// Create a memo from an infallible derivation.
    ///
    /// Nothing is evaluated until the memo is read or subscribed to.
    fn create_memo<T, F>(&self, derive: F) -> Memo<T>
    where
        T: Clone + PartialEq + 'static,
        F: Fn() -> T + 'static;

    /// Create a memo whose derivation can fail, typically by reading other memos
    /// with `?`.
    fn try_create_memo<T, F>(&self, derive: F) -> Memo<T>
    where
        T: Clone + PartialEq + 'static,
        F: Fn() -> anyhow::Result<T> + 'static;

    /// Create a fallible memo with an explicit label and/or equality predicate.
    fn create_memo_with<T, F>(&self, options: MemoOptions<T>, derive: F) -> Memo<T>
    where
        T: Clone + 'static,
        F: Fn() -> anyhow::Result<T> + 'static;
}

fn default_label<F>() -> Arc<str> {
    Arc::from(type_name::<F>())
}

impl SignalContext for Graph {
    fn create_signal<T: Clone + PartialEq + 'static>(&self, initial: T) -> Signal<T> {
        Signal::new(self.clone(), initial, Equality::partial_eq())
    }

    fn create_signal_with<T: Clone + 'static>(
        &self,
        initial: T,
        equality: Equality<T>,
    ) -> Signal<T> {
        Signal::new(self.clone(), initial, equality)
    }

    fn create_memo<T, F>(&self, derive: F) -> Memo<T>
    where
        T: Clone + PartialEq + 'static,
        F: Fn() -> T + 'static,
    {
        Memo::new(
            self.clone(),
            default_label::<F>(),
            Equality::partial_eq(),
            Box::new(move || Ok(derive())),
        )
    }

    fn try_create_memo<T, F>(&self, derive: F) -> Memo<T>
    where
        T: Clone + PartialEq + 'static,
        F: Fn() -> anyhow::Result<T> + 'static,
    {
        Memo::new(
            self.clone(),
            default_label::<F>(),
            Equality::partial_eq(),
            Box::new(derive),
        )
    }

    fn create_memo_with<T, F>(&self, options: MemoOptions<T>, derive: F) -> Memo<T>
    where
        T: Clone + 'static,
        F: Fn() -> anyhow::Result<T> + 'static,
    {
        let (label, equality) = options.into_parts();
        let label = label.unwrap_or_else(default_label::<F>);
        Memo::new(self.clone(), label, equality, Box::new(derive))
    }
}
