//! # Reactive Graph
//!
//! Mutable cells whose reads are recorded automatically, and derived cells that
//! re-evaluate exactly when something they read last time changes.
//!
//! ## Features
//!
//! - **Clone-able handles**: `Signal<T>` and `Memo<T>` are cheap `Rc` handles
//! - **Automatic tracking**: a memo depends on whatever it read during its last evaluation
//! - **Lazy until observed**: memos without subscribers evaluate on read and hold no subscriptions
//! - **Cycle detection**: self-referential derivations fail with an error instead of overflowing
//! - **Error chains**: failures carry the chain of derivations they passed through
//!
//! ## Example
//!
//! ```rust,no_run
//! use reactive_graph::prelude::*;
//!
//! let graph = Graph::new();
//! let t = graph.create_signal(12);
//! let u = graph.create_signal(3);
//! let c = graph.create_memo({
//!     let (t, u) = (t.clone(), u.clone());
//!     move || if t.get() > 10 { t.get() * u.get() } else { t.get() }
//! });
//!
//! let subscription = c.subscribe(|new, old| println!("{old} -> {new}")).unwrap();
//! u.set(4).unwrap();
//! assert_eq!(c.get().unwrap(), 48);
//! assert_eq!(c.dependency_count(), 2);
//!
//! t.set(5).unwrap();
//! assert_eq!(c.dependency_count(), 1);
//! subscription.unsubscribe();
//! ```

mod computed;
mod context;
mod equality;
mod error;
mod signal;
mod storage;
mod stream;
mod tracking;

pub use computed::{Memo, MemoOptions};
pub use context::{Graph, SignalContext};
pub use equality::Equality;
pub use error::{DerivationError, Error};
pub use signal::{ReadOnlySignal, Readable, Signal};
pub use storage::{CellId, Subscription};
pub use stream::Changes;

// Re-export the prelude
pub mod prelude {
    pub use crate::{
        Equality, Error, Graph, Memo, MemoOptions, ReadOnlySignal, Readable, Signal,
        SignalContext, Subscription,
    };
}

#[cfg(test)]
pub(crate) fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
