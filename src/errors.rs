//! The error surface shared by every fallible operation in the crate.

use thiserror::Error;

use crate::NodeAddress;

/// Convenience alias used throughout the crate.
pub type TreeResult<T> = Result<T, TreeError>;

#[derive(Debug, Error)]
pub enum TreeError {
    /// A build parameter or configuration document failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A point contained a NaN or infinite coordinate.
    #[error("invalid point: {0}")]
    InvalidPoint(String),

    /// A query vector's length does not match the store dimension.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// The address does not name a node in this tree. Indicates a caller bug.
    #[error("no node at address {0:?}")]
    AddressNotFound(NodeAddress),

    /// An operation that needs at least one point was run on an empty store.
    #[error("the tree has no points")]
    EmptyTree,

    /// A long-running operation observed its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// Reading the data or labels file failed.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<csv::Error> for TreeError {
    fn from(err: csv::Error) -> Self {
        match err.into_kind() {
            csv::ErrorKind::Io(io) => TreeError::IoError(io),
            other => TreeError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("malformed labels file: {other:?}"),
            )),
        }
    }
}
