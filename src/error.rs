//! Recoverable errors.
//!
//! Contract violations (releasing an unheld token, underflow, destroying a
//! held counter) are not represented here: they panic.

use core::fmt;

use crate::tokens::TokenId;

/// Errors returned by counter and inspector operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use = "refcount errors must be handled"]
pub enum RefError {
    /// Audit bookkeeping could not be allocated.
    OutOfMemory {
        /// Which structure failed to grow.
        what: &'static str,
    },

    /// The counter's cap on live audited holds was reached.
    AuditLimit { limit: usize },

    /// The history view was requested from a counter that does not log.
    LoggingDisabled,

    /// No live holder with this id.
    UnknownToken(TokenId),

    /// `hold_many` was asked for zero references.
    ZeroHold,

    /// The output writer failed.
    Format,
}

impl fmt::Display for RefError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefError::OutOfMemory { what } => write!(f, "out of memory allocating {}", what),
            RefError::AuditLimit { limit } => {
                write!(f, "audited hold limit reached ({} live holds)", limit)
            }
            RefError::LoggingDisabled => f.write_str("logging is disabled for this refcount"),
            RefError::UnknownToken(id) => write!(f, "no live holder {}", id),
            RefError::ZeroHold => f.write_str("hold of zero references"),
            RefError::Format => f.write_str("failed to write refcount report"),
        }
    }
}

impl std::error::Error for RefError {}

impl From<fmt::Error> for RefError {
    fn from(_: fmt::Error) -> Self {
        RefError::Format
    }
}

pub type RefResult<T> = Result<T, RefError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_failure() {
        let e = RefError::OutOfMemory { what: "audit stack" };
        assert_eq!(e.to_string(), "out of memory allocating audit stack");
        let e = RefError::AuditLimit { limit: 4 };
        assert!(e.to_string().contains("4 live holds"));
    }
}
