//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors raised when a client-supplied identity is not acceptable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The identity carries an empty (or whitespace-only) id
    #[error("Identity id must not be empty")]
    EmptyId,

    /// A field exceeds its length limit
    #[error("{field} is {len} bytes long (max: {max})")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

/// Result type for identity validation.
pub type IdentityResult<T> = Result<T, IdentityError>;
