//! Subscriber storage shared by every cell.
//!
//! Subscribers are kept in a map keyed by a per-cell, monotonically increasing
//! [`SubscriptionId`]. Ids are never reused, so iteration order is insertion
//! order and a subscriber removed while a notification pass is running is simply
//! not found when the pass reaches it.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Error;

static NEXT_CELL_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identifier of a cell.
///
/// Used as the key of dependency maps; it says nothing about the cell's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellId(u64);

impl CellId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell#{}", self.0)
    }
}

/// Identifier of one subscription on one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

/// Callback invoked with `(new, old)` after a cell's value changed.
///
/// Internal listeners (memos refreshing themselves) can fail, which aborts the
/// notification pass and hands the error back to the writer.
pub(crate) type Listener<T> = Rc<dyn Fn(&T, &T) -> Result<(), Error>>;

pub(crate) fn listener<T>(f: impl Fn(&T, &T) -> Result<(), Error> + 'static) -> Listener<T> {
    Rc::new(f)
}

/// Ordered subscriber set of a single cell.
pub(crate) struct SubscriberRegistry<T> {
    next_id: u64,
    entries: BTreeMap<SubscriptionId, Listener<T>>,
    /// Maintained on insert/remove rather than recomputed from `entries`.
    count: usize,
}

impl<T> SubscriberRegistry<T> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            entries: BTreeMap::new(),
            count: 0,
        }
    }

    pub fn insert(&mut self, listener: Listener<T>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.entries.insert(id, listener);
        self.count += 1;
        id
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        if self.entries.remove(&id).is_some() {
            self.count -= 1;
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    /// Upper bound (exclusive) of the ids that exist right now.
    ///
    /// A notification pass captures this before it starts so subscribers added
    /// during the pass are left for the next change.
    pub fn watermark(&self) -> SubscriptionId {
        SubscriptionId(self.next_id)
    }

    /// The first live subscriber after `cursor` and before `end`.
    pub fn next_after(
        &self,
        cursor: Option<SubscriptionId>,
        end: SubscriptionId,
    ) -> Option<(SubscriptionId, Listener<T>)> {
        let start = match cursor {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        self.entries
            .range((start, Bound::Excluded(end)))
            .next()
            .map(|(id, listener)| (*id, listener.clone()))
    }
}

/// Walk every subscriber registered when the pass starts, in insertion order.
///
/// The registry is only borrowed while looking up the next entry, so listeners
/// may subscribe or unsubscribe anything (themselves included) while running.
pub(crate) fn notify_subscribers<T>(
    registry: &RefCell<SubscriberRegistry<T>>,
    new: &T,
    old: &T,
) -> Result<(), Error> {
    let end = registry.borrow().watermark();
    let mut cursor = None;
    loop {
        let next = registry.borrow().next_after(cursor, end);
        let Some((id, listener)) = next else {
            return Ok(());
        };
        cursor = Some(id);
        listener(new, old)?;
    }
}

/// Handle returned by every `subscribe` call.
///
/// [`unsubscribe`](Subscription::unsubscribe) may be called any number of times;
/// only the first call has an effect. Dropping the handle keeps the subscriber
/// registered.
pub struct Subscription {
    remove: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl Subscription {
    pub(crate) fn new(remove: impl FnOnce() + 'static) -> Self {
        Self {
            remove: RefCell::new(Some(Box::new(remove))),
        }
    }

    /// Stop receiving notifications.
    pub fn unsubscribe(&self) {
        let remove = self.remove.borrow_mut().take();
        if let Some(remove) = remove {
            remove();
        }
    }

    /// Whether `unsubscribe` has not been called yet.
    pub fn is_active(&self) -> bool {
        self.remove.borrow().is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
