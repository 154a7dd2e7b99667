//! Equality predicates deciding whether a write is a change.

use std::fmt;
use std::rc::Rc;

/// Predicate comparing a cell's current value with a candidate new value.
///
/// A write only notifies subscribers when the predicate returns `false`.
pub struct Equality<T: ?Sized>(Rc<dyn Fn(&T, &T) -> bool>);

impl<T: ?Sized> Clone for Equality<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: ?Sized + 'static> Equality<T> {
    /// Use an arbitrary predicate.
    pub fn custom(eq: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self(Rc::new(eq))
    }

    /// Treat every write as a change.
    pub fn never() -> Self {
        Self::custom(|_, _| false)
    }

    pub fn is_equal(&self, a: &T, b: &T) -> bool {
        (self.0)(a, b)
    }
}

impl<T: ?Sized + PartialEq + 'static> Equality<T> {
    /// Ordinary value equality. This is the default for every cell.
    pub fn partial_eq() -> Self {
        Self::custom(|a, b| a == b)
    }
}

impl<T: PartialEq + 'static> Default for Equality<T> {
    fn default() -> Self {
        Self::partial_eq()
    }
}

impl<U: ?Sized + 'static> Equality<Rc<U>> {
    /// Compare shared values by allocation instead of by content.
    ///
    /// Replacing a container with a freshly built one always counts as a
    /// change, even when the contents are the same.
    pub fn identity() -> Self {
        Self::custom(|a, b| Rc::ptr_eq(a, b))
    }
}

impl<T: 'static> Equality<T> {
    /// Lift the predicate to optional values; `None` only equals `None`.
    pub(crate) fn lift_option(&self) -> Equality<Option<T>> {
        let inner = self.clone();
        Equality::custom(move |a: &Option<T>, b: &Option<T>| match (a, b) {
            (Some(a), Some(b)) => inner.is_equal(a, b),
            (None, None) => true,
            _ => false,
        })
    }
}

impl<T: ?Sized> fmt::Debug for Equality<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Equality(..)")
    }
}
