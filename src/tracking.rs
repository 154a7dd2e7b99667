//! Dependency tracking.
//!
//! A [`Tracker`] is a stack of open frames. Evaluating a derivation pushes a
//! frame, every cell read while it is on top records itself there, and the
//! frame is popped when the derivation returns. Nested derivations get their own
//! frame, so a read is only ever attributed to the innermost evaluation.
//!
//! Each thread also keeps a list of which tracker owns the innermost open
//! frame. A cell read while another graph's derivation is on top cannot be
//! recorded there; the read is flagged on that frame instead.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Error;
use crate::storage::{CellId, Subscription};

/// Type-erased change callback used for dependency subscriptions.
pub(crate) type Refresh = Rc<dyn Fn() -> Result<(), Error>>;

/// Anything a derivation can depend on.
pub(crate) trait Source {
    fn source_id(&self) -> CellId;

    /// Subscribe `refresh` to value changes of this source.
    ///
    /// Subscribing to a memo makes it listen even when the evaluation this
    /// forces fails; it is then refreshed by its own dependencies like any
    /// other listening memo.
    fn subscribe_source(&self, refresh: Refresh) -> Subscription;
}

/// One upstream cell read by a derivation during its last evaluation.
pub(crate) struct Dependency {
    source: Weak<dyn Source>,
    /// Present exactly while the owning memo is listening.
    subscription: Option<Subscription>,
}

impl Dependency {
    fn new(source: Weak<dyn Source>) -> Self {
        Self {
            source,
            subscription: None,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }

    /// Subscribe `refresh` unless already subscribed or the source is gone.
    pub fn subscribe(&mut self, refresh: &Refresh) {
        if self.subscription.is_some() {
            return;
        }
        if let Some(source) = self.source.upgrade() {
            self.subscription = Some(source.subscribe_source(refresh.clone()));
        }
    }

    /// Hand out the live subscription, leaving the record unsubscribed.
    pub fn take_subscription(&mut self) -> Option<Subscription> {
        self.subscription.take()
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("alive", &(self.source.strong_count() > 0))
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

/// Dependency set keyed by upstream cell id.
pub(crate) type Dependencies = BTreeMap<CellId, Dependency>;

/// What one frame saw while it was open.
#[derive(Debug, Default)]
pub(crate) struct Recorded {
    pub dependencies: Dependencies,
    /// First cell of another graph read while this frame was on top.
    pub foreign_read: Option<CellId>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct TrackerId(u64);

impl TrackerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

struct OpenFrame {
    tracker: TrackerId,
    foreign_read: Option<CellId>,
}

// Innermost open frame across every graph on this thread.
thread_local! {
    static OPEN_FRAMES: RefCell<Vec<OpenFrame>> = const { RefCell::new(Vec::new()) };
}

/// Stack of open tracking frames.
pub(crate) struct Tracker {
    id: TrackerId,
    frames: RefCell<Vec<Dependencies>>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self {
            id: TrackerId::next(),
            frames: RefCell::new(Vec::new()),
        }
    }
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_tracking(&self) -> bool {
        !self.frames.borrow().is_empty()
    }

    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Record a read of `id` in the top frame.
    ///
    /// `source` is only called the first time `id` is seen in that frame.
    pub fn report_usage(&self, id: CellId, source: impl FnOnce() -> Weak<dyn Source>) {
        if self.flag_foreign_read(id) {
            log::warn!("{id} was read by a derivation of another graph");
            return;
        }
        let mut frames = self.frames.borrow_mut();
        if let Some(frame) = frames.last_mut() {
            frame
                .entry(id)
                .or_insert_with(|| Dependency::new(source()));
        }
    }

    /// Whether the innermost open frame on this thread belongs to another
    /// tracker. If so, the read is noted on that frame.
    fn flag_foreign_read(&self, id: CellId) -> bool {
        OPEN_FRAMES.with(|open| match open.borrow_mut().last_mut() {
            Some(top) if top.tracker != self.id => {
                top.foreign_read.get_or_insert(id);
                true
            }
            _ => false,
        })
    }

    /// Push a new frame. The frame is popped when the guard is finished or dropped.
    pub fn start_tracking(&self) -> Frame<'_> {
        let mut frames = self.frames.borrow_mut();
        frames.push(Dependencies::new());
        OPEN_FRAMES.with(|open| {
            open.borrow_mut().push(OpenFrame {
                tracker: self.id,
                foreign_read: None,
            })
        });
        Frame {
            tracker: self,
            depth: frames.len(),
            finished: false,
        }
    }

    /// Run `f` inside a fresh frame and return what it read.
    ///
    /// The frame is popped before `f`'s result (or panic) leaves this
    /// function, so the stack stays balanced on every path.
    pub fn track_dependencies<T>(&self, f: impl FnOnce() -> T) -> (T, Recorded) {
        let frame = self.start_tracking();
        let value = f();
        (value, frame.finish_tracking())
    }

    fn pop(&self, depth: usize) -> Recorded {
        let mut frames = self.frames.borrow_mut();
        debug_assert_eq!(frames.len(), depth, "tracking frames finished out of order");
        let foreign_read = OPEN_FRAMES
            .with(|open| open.borrow_mut().pop())
            .and_then(|open| open.foreign_read);
        Recorded {
            dependencies: frames.pop().unwrap_or_default(),
            foreign_read,
        }
    }
}

/// Scoped handle to the frame pushed by [`Tracker::start_tracking`].
pub(crate) struct Frame<'a> {
    tracker: &'a Tracker,
    depth: usize,
    finished: bool,
}

impl Frame<'_> {
    /// Pop the frame and return what was recorded in it.
    pub fn finish_tracking(mut self) -> Recorded {
        self.finished = true;
        self.tracker.pop(self.depth)
    }
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.tracker.pop(self.depth);
        }
    }
}
