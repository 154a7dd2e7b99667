//! Errors raised while evaluating derived values.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::storage::CellId;

/// Error returned by reads and writes that trigger a re-evaluation.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A derivation was re-entered while it was still evaluating.
    #[error("circular dependency detected")]
    CircularDependency,

    /// A derivation read a cell created in a different graph.
    #[error("{0} belongs to a different graph than the derivation reading it")]
    ForeignRead(CellId),

    /// A derivation function failed.
    #[error(transparent)]
    Derivation(#[from] DerivationError),
}

impl Error {
    /// The derivation failure, if this is one.
    pub fn as_derivation(&self) -> Option<&DerivationError> {
        match self {
            Error::Derivation(err) => Some(err),
            Error::CircularDependency | Error::ForeignRead(_) => None,
        }
    }
}

/// Failure of a derivation function, with the chain of upstream derivations
/// that failed underneath it.
///
/// Each link corresponds to one derivation boundary: if memo `a` reads memo `b`
/// and `b` fails, the error returned from `a` carries `b`'s error as its
/// [`cause`](DerivationError::cause).
#[derive(Debug, Clone)]
pub struct DerivationError {
    label: Arc<str>,
    reason: Option<String>,
    cause: Option<Box<DerivationError>>,
}

impl DerivationError {
    pub(crate) fn new(label: Arc<str>, reason: Option<String>) -> Self {
        Self {
            label,
            reason,
            cause: None,
        }
    }

    pub(crate) fn nested(label: Arc<str>, cause: DerivationError) -> Self {
        Self {
            label,
            reason: None,
            cause: Some(Box::new(cause)),
        }
    }

    /// Normalize whatever a derivation returned into a derivation failure.
    ///
    /// An upstream `DerivationError` becomes the nested cause; anything else,
    /// including this crate's other errors, is kept as the reason using its
    /// display form.
    pub(crate) fn from_failure(label: Arc<str>, failure: anyhow::Error) -> Self {
        match failure.downcast::<Error>() {
            Ok(Error::Derivation(inner)) => Self::nested(label, inner),
            Ok(err) => Self::new(label, Some(err.to_string())),
            Err(other) => match other.downcast::<DerivationError>() {
                Ok(inner) => Self::nested(label, inner),
                Err(other) => Self::new(label, Some(other.to_string())),
            },
        }
    }

    /// Identity of the derivation that failed.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Human readable reason, when the failure originated in this derivation.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// The upstream derivation failure that caused this one.
    pub fn cause(&self) -> Option<&DerivationError> {
        self.cause.as_deref()
    }

    /// Number of nested causes below this error.
    pub fn depth(&self) -> usize {
        self.causes().count() - 1
    }

    /// The innermost failure of the chain.
    pub fn root_cause(&self) -> &DerivationError {
        let mut current = self;
        while let Some(cause) = current.cause() {
            current = cause;
        }
        current
    }

    /// Iterate over this error followed by every nested cause.
    pub fn causes(&self) -> impl Iterator<Item = &DerivationError> {
        std::iter::successors(Some(self), |err| err.cause())
    }

    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(
            f,
            "\n\nnested derivation (depth {depth}): {}",
            self.label
        )?;
        if let Some(reason) = &self.reason {
            write!(f, "\n\nnested error (depth {depth}): {reason}")?;
        }
        match &self.cause {
            Some(cause) => cause.fmt_nested(f, depth + 1),
            None => Ok(()),
        }
    }
}

impl fmt::Display for DerivationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "an error occurred while generating a computed value, derivation: {}",
            self.label
        )?;
        if let Some(cause) = &self.cause {
            cause.fmt_nested(f, 1)?;
        }
        if let Some(reason) = &self.reason {
            write!(f, "\n\nthe error was: {reason}")?;
        }
        Ok(())
    }
}

impl std::error::Error for DerivationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(name: &str) -> Arc<str> {
        Arc::from(name)
    }

    #[test]
    fn test_reason_from_plain_error() {
        let err = DerivationError::from_failure(label("outer"), anyhow::anyhow!("boom"));
        assert_eq!(err.label(), "outer");
        assert_eq!(err.reason(), Some("boom"));
        assert!(err.cause().is_none());
        assert_eq!(
            err.to_string(),
            "an error occurred while generating a computed value, derivation: outer\n\nthe error was: boom"
        );
    }

    #[test]
    fn test_circular_becomes_reason() {
        let err = DerivationError::from_failure(
            label("self_ref"),
            anyhow::Error::new(Error::CircularDependency),
        );
        assert_eq!(err.reason(), Some("circular dependency detected"));
        assert_eq!(err.depth(), 0);
    }

    #[test]
    fn test_upstream_failure_is_nested() {
        let inner = DerivationError::new(label("inner"), Some("bad input".into()));
        let middle = DerivationError::from_failure(
            label("middle"),
            anyhow::Error::new(Error::Derivation(inner)),
        );
        let outer = DerivationError::from_failure(
            label("outer"),
            anyhow::Error::new(Error::from(middle)),
        );

        assert_eq!(outer.depth(), 2);
        assert_eq!(outer.reason(), None);
        assert_eq!(outer.root_cause().label(), "inner");
        let labels: Vec<&str> = outer.causes().map(|err| err.label()).collect();
        assert_eq!(labels, ["outer", "middle", "inner"]);

        assert_eq!(
            outer.to_string(),
            "an error occurred while generating a computed value, derivation: outer\
             \n\nnested derivation (depth 1): middle\
             \n\nnested derivation (depth 2): inner\
             \n\nnested error (depth 2): bad input"
        );
    }

    #[test]
    fn test_source_walks_the_chain() {
        use std::error::Error as _;

        let inner = DerivationError::new(label("inner"), Some("nope".into()));
        let outer = DerivationError::nested(label("outer"), inner);
        let err = Error::from(outer);

        let source = err.source().expect("nested cause");
        assert!(source.to_string().contains("derivation: inner"));
        assert!(source.source().is_none());
    }
}
