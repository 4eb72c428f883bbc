//! # Void ListQ - Sequential Mutation Queue
//!
//! Accepts list operations from any thread and applies them one at a time
//! against a list owned by someone else. Each operation reads the latest
//! committed snapshot, so the visible list moves through a strictly ordered
//! sequence of transitions even when commits finish asynchronously.
//!
//! ## Architecture
//!
//! ```text
//! Thread A ──┐                                       ┌──► SnapshotSource::commit
//!            ├──► Admission ──► Pending ──► Execute ─┤
//! Thread B ──┘   (merge, cap)   (FIFO)     (one)     └──◄ on_committed ──► next
//! ```
//!
//! ## Key Concepts
//!
//! - **OperationProcessor**: Generic single-flight engine with bounded admission
//! - **QueueHandler**: What "executing" an operation means
//! - **Scheduler**: Where the execution loop runs (inline or a worker thread)
//! - **SnapshotSource**: The external owner of the list
//! - **ListQueue**: The processor wired up for `void_listops` operations
//! - **DebugEvent**: Best-effort trace of every queue transition

pub mod collaborator;
pub mod config;
pub mod error;
pub mod event;
pub mod list_queue;
pub mod policy;
pub mod processor;
pub mod schedule;
pub mod stats;

pub use collaborator::{OnCommitted, SharedList, SnapshotSource, ThreadedList};
pub use config::{ConfigError, ConfigResult, QueueConfig, SchedulerKind};
pub use error::{catch_panic, ExecuteError, ExecuteResult};
pub use event::{DebugEvent, DebugListener, QueueEventType};
pub use list_queue::{CompletionListener, DropListener, ListQueue};
pub use policy::{DropReason, OverflowPolicy, QueuePolicy};
pub use processor::{Completion, OperationProcessor, QueueHandler};
pub use schedule::{InlineScheduler, Scheduler, Task, WorkerScheduler};
pub use stats::{InFlight, QueueStats};

pub use void_listops::{names, ListChange, ListOp, ListOpError, Operation};
