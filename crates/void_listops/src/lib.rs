//! # Void ListOps - List Mutation Operations
//!
//! A closed set of commands that transform an immutable list snapshot into a
//! new one. Operations never touch the list they are applied to; they read a
//! snapshot and return the next snapshot plus a hint describing what changed.
//!
//! ## Architecture
//!
//! ```text
//! Caller ──► Operation ──► apply(snapshot) ──► Applied { items, change } ──► Collaborator
//! ```
//!
//! ## Key Concepts
//!
//! - **ListOp**: The payload of a command (append, insert, move, ...)
//! - **Operation**: A `ListOp` plus an optional completion callback
//! - **ListChange**: Positional hint for the collaborator (insert/remove/move)
//! - **ListOpError**: Typed validation failure for bad indices or missing values

pub mod change;
pub mod error;
pub mod op;

pub use change::ListChange;
pub use error::ListOpError;
pub use op::{names, Applied, CompletionCallback, ListOp, Operation};
