//! Error handling foundation for casdoor-sso.
//!
//! This module provides the `Result` type alias using rootcause and the
//! error type shared by every host store implementation. Domain crates
//! define their own error enums and add layer-appropriate context as
//! errors propagate.

use rootcause::Report;
use std::fmt;

/// A Result type alias using rootcause's Report for error handling.
///
/// Each layer adds its own context via `.context()` as errors propagate.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

/// Errors raised by host-owned account and session stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    Conflict { field: String, value: String },
    /// The record could not be found.
    NotFound { what: String },
    /// The backing store failed.
    Backend { details: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict { field, value } => {
                write!(f, "{field} '{value}' is already in use")
            }
            Self::NotFound { what } => write!(f, "{what} not found"),
            Self::Backend { details } => write!(f, "store backend error: {details}"),
        }
    }
}

impl std::error::Error for StoreError {}
