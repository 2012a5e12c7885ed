//! Crate-wide error types.
//!
//! Per the engine's error model, only [`ErrorKind::KeyNotFound`] is a routine,
//! recoverable condition. Every other kind represents a structural violation,
//! a backing-store I/O failure, or a serialization mismatch, and is treated
//! as fatal: the caller is expected to let [`Error::fatal`] panic rather than
//! attempt to continue with a possibly corrupt tree.

use std::fmt;

/// The result type used throughout the backing-store and swap-space layers.
pub type Result<T> = std::result::Result<T, Error>;

/// A structured error, carrying enough context to explain a fatal abort.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {context}")]
pub struct Error {
    kind: ErrorKind,
    context: String,
}

impl Error {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Error {
            kind,
            context: context.into(),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Panics with this error's structured `Display` output.
    ///
    /// Used at the one point a caller discovers a condition the engine
    /// documents as fatal (see the error-kind table in the crate's design
    /// notes): a corrupted backing-store blob, a missing (id, version) pair,
    /// or an invariant violation such as a double allocation.
    pub fn fatal(self) -> ! {
        panic!("{self}");
    }
}

/// The kinds of error this crate can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// The queried key has no live value. Routinely surfaced to callers.
    #[error("key not found")]
    KeyNotFound,
    /// The backing store could not service an `allocate`/`get`/`put`/`deallocate` call.
    #[error("backing store I/O failure")]
    BackingStoreIo,
    /// A stored blob did not decode into the expected node representation.
    #[error("serialization mismatch")]
    Serialization,
    /// An internal bookkeeping invariant (refcount, pivot presence, object
    /// table consistency) was violated.
    #[error("structural violation")]
    Structural,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.context)
    }
}
