//! Validation errors raised by `ListOp::apply`

use thiserror::Error;

/// Errors from applying an operation to a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListOpError {
    #[error("Cannot insert at position {index}. Valid range: 0..={len}")]
    InsertOutOfRange { index: isize, len: usize },

    #[error("Cannot remove item at position {index}. Valid range: 0..{len}")]
    RemoveOutOfRange { index: isize, len: usize },

    #[error("Cannot replace item at position {index}. Valid range: 0..{len}")]
    ReplaceOutOfRange { index: isize, len: usize },

    #[error("Cannot move item from {from} to {to}. Valid range: 0..{len}")]
    MoveOutOfRange { from: isize, to: isize, len: usize },

    #[error("Item not found in the list")]
    ItemNotFound,
}

/// Result type for list operations
pub type ListOpResult<T> = Result<T, ListOpError>;
