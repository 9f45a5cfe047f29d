//! Recoverable error types.
//!
//! Precondition violations (dimension mismatches, null where non-null is
//! required, singular triangular solves) are programmer errors and `panic!`
//! at the point of detection, matching the C original's `assert()` calls.
//! `Error`/`ErrorKind` is reserved for the one recoverable numerical failure
//! that is not simply "fill the output with NaN": a covariance matrix that
//! fails Cholesky factorization.

#[cfg(feature = "std")]
use thiserror::Error as ThisError;

/// The kind of recoverable failure that occurred.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ErrorKind {
    /// A covariance matrix was not symmetric positive (semi-)definite where
    /// a Cholesky factor was required.
    CovarianceNotPositiveSemiDefinite,
    /// The step store is empty; the requested operation has nothing to act on.
    EmptyStepStore,
    /// The operation is only meaningful for on-line (sequential-family) engines.
    UnsupportedOnAssociativeEngine,
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ErrorKind::CovarianceNotPositiveSemiDefinite => {
                write!(f, "covariance matrix is not positive semi-definite")
            }
            ErrorKind::EmptyStepStore => write!(f, "step store is empty"),
            ErrorKind::UnsupportedOnAssociativeEngine => {
                write!(f, "operation not supported on the associative engine")
            }
        }
    }
}

/// Top-level error type returned by recoverable fallible operations.
#[cfg(feature = "std")]
#[derive(Debug, ThisError, PartialEq, Clone, Copy)]
#[error("{kind}")]
pub struct Error {
    kind: ErrorKind,
}

#[cfg(not(feature = "std"))]
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Error {
    kind: ErrorKind,
}

#[cfg(not(feature = "std"))]
impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error { kind }
    }
}
