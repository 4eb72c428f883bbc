//! Debug events - best-effort tracing of queue transitions
//!
//! Events are emitted after the queue lock is released. A listener observes
//! the queue; it never influences admission or execution.

use crate::policy::DropReason;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Kind of queue transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueEventType {
    /// Operation admitted to the pending queue
    Enqueued,
    /// Operation dropped without running
    Dropped,
    /// Operation taken off the queue and started
    Started,
    /// Operation finished (successfully or not)
    Completed,
    /// Operation failed while executing
    Error,
    /// Pending queue cleared
    Cleared,
}

impl fmt::Display for QueueEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Enqueued => "ENQUEUED",
            Self::Dropped => "DROPPED",
            Self::Started => "STARTED",
            Self::Completed => "COMPLETED",
            Self::Error => "ERROR",
            Self::Cleared => "CLEARED",
        };
        f.write_str(name)
    }
}

/// A single observation of the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugEvent {
    /// What happened
    pub event_type: QueueEventType,
    /// Operation involved, if any
    pub operation_name: Option<String>,
    /// Pending queue size after the transition
    pub pending_size: usize,
    /// Whether an operation was in flight after the transition
    pub is_processing: bool,
    /// Name of the emitting thread, if it has one
    pub thread_name: Option<String>,
    /// Debug rendering of the emitting thread's id
    pub thread_id: String,
    /// Set for `Dropped` and `Cleared`
    pub drop_reason: Option<DropReason>,
    /// Extra context, e.g. the error message for `Error`
    pub message: Option<String>,
}

impl DebugEvent {
    /// Build an event stamped with the current thread
    pub fn new(
        event_type: QueueEventType,
        operation_name: Option<String>,
        pending_size: usize,
        is_processing: bool,
    ) -> Self {
        let thread = std::thread::current();
        Self {
            event_type,
            operation_name,
            pending_size,
            is_processing,
            thread_name: thread.name().map(str::to_string),
            thread_id: format!("{:?}", thread.id()),
            drop_reason: None,
            message: None,
        }
    }

    pub fn with_drop_reason(mut self, reason: DropReason) -> Self {
        self.drop_reason = Some(reason);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for DebugEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<9} {:<12} pending={} processing={} thread={}",
            self.event_type,
            self.operation_name.as_deref().unwrap_or("-"),
            self.pending_size,
            self.is_processing,
            self.thread_name.as_deref().unwrap_or(&self.thread_id),
        )?;
        if let Some(reason) = self.drop_reason {
            write!(f, " reason={}", reason)?;
        }
        if let Some(message) = &self.message {
            write!(f, " message={:?}", message)?;
        }
        Ok(())
    }
}

/// Listener receiving debug events
pub type DebugListener = Arc<dyn Fn(&DebugEvent) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_display() {
        let event = DebugEvent::new(QueueEventType::Dropped, Some("Append".into()), 1, true)
            .with_drop_reason(DropReason::Merged);
        let text = event.to_string();
        assert!(text.starts_with("DROPPED"));
        assert!(text.contains("Append"));
        assert!(text.contains("reason=MERGED"));
    }

    #[test]
    fn test_event_serializes_screaming_case() {
        let event = DebugEvent::new(QueueEventType::Started, None, 0, true);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"STARTED\""));
        assert!(json.contains("\"drop_reason\":null"));
    }
}
