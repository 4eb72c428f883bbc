//! Admission policy - bounded capacity, overflow handling and drop reasons

use serde::{Deserialize, Serialize};
use std::fmt;

/// What to do when the pending queue is at capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverflowPolicy {
    /// Reject the incoming operation and keep the queue as is
    DropNew,
    /// Evict the oldest pending operation and admit the incoming one
    DropOldest,
    /// Evict every pending operation and admit the incoming one alone
    ClearAndEnqueue,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        Self::DropNew
    }
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DropNew => write!(f, "DROP_NEW"),
            Self::DropOldest => write!(f, "DROP_OLDEST"),
            Self::ClearAndEnqueue => write!(f, "CLEAR_AND_ENQUEUE"),
        }
    }
}

impl std::str::FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "DROP_NEW" => Ok(Self::DropNew),
            "DROP_OLDEST" => Ok(Self::DropOldest),
            "CLEAR_AND_ENQUEUE" | "CLEAR" => Ok(Self::ClearAndEnqueue),
            _ => Err(format!("Unknown overflow policy: {}", s)),
        }
    }
}

/// Why an operation never ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DropReason {
    /// Queue full, policy `DropNew` rejected the incoming operation
    QueueFullDropNew,
    /// Queue full, policy `DropOldest` evicted this operation from the head
    QueueFullDropOldest,
    /// Queue full, policy `ClearAndEnqueue` evicted this operation
    QueueFullClear,
    /// Evicted by an explicit clear-and-enqueue call
    ClearedExplicit,
    /// Evicted by a clear-queue call
    ClearedByApi,
    /// Superseded by a newer operation with the same merge key
    Merged,
}

impl DropReason {
    /// Whether the drop came from capacity pressure
    pub fn is_overflow(&self) -> bool {
        matches!(
            self,
            Self::QueueFullDropNew | Self::QueueFullDropOldest | Self::QueueFullClear
        )
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFullDropNew => write!(f, "QUEUE_FULL_DROP_NEW"),
            Self::QueueFullDropOldest => write!(f, "QUEUE_FULL_DROP_OLDEST"),
            Self::QueueFullClear => write!(f, "QUEUE_FULL_CLEAR"),
            Self::ClearedExplicit => write!(f, "CLEARED_EXPLICIT"),
            Self::ClearedByApi => write!(f, "CLEARED_BY_API"),
            Self::Merged => write!(f, "MERGED"),
        }
    }
}

/// Capacity and overflow settings for the pending queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    max_pending: usize,
    overflow_policy: OverflowPolicy,
}

impl QueuePolicy {
    /// `max_pending` value meaning "no limit"
    pub const UNBOUNDED: usize = 0;

    /// Create a policy; `max_pending == 0` means unbounded
    pub fn new(max_pending: usize, overflow_policy: OverflowPolicy) -> Self {
        Self {
            max_pending,
            overflow_policy,
        }
    }

    /// Unbounded queue (overflow policy never consulted)
    pub fn unbounded() -> Self {
        Self::new(Self::UNBOUNDED, OverflowPolicy::default())
    }

    /// Capacity limit, `None` when unbounded
    pub fn limit(&self) -> Option<usize> {
        (self.max_pending != Self::UNBOUNDED).then_some(self.max_pending)
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow_policy
    }

    /// Whether a queue holding `pending` operations has no room left
    pub fn is_full(&self, pending: usize) -> bool {
        self.limit().map_or(false, |limit| pending >= limit)
    }
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_limits() {
        let policy = QueuePolicy::unbounded();
        assert_eq!(policy.limit(), None);
        assert!(!policy.is_full(usize::MAX));

        let policy = QueuePolicy::new(2, OverflowPolicy::DropOldest);
        assert_eq!(policy.limit(), Some(2));
        assert!(!policy.is_full(1));
        assert!(policy.is_full(2));
    }

    #[test]
    fn test_overflow_policy_parse() {
        assert_eq!("drop_new".parse::<OverflowPolicy>(), Ok(OverflowPolicy::DropNew));
        assert_eq!("drop-oldest".parse::<OverflowPolicy>(), Ok(OverflowPolicy::DropOldest));
        assert_eq!(
            "CLEAR_AND_ENQUEUE".parse::<OverflowPolicy>(),
            Ok(OverflowPolicy::ClearAndEnqueue)
        );
        assert!("sometimes".parse::<OverflowPolicy>().is_err());
    }

    #[test]
    fn test_drop_reason_display() {
        assert_eq!(DropReason::Merged.to_string(), "MERGED");
        assert_eq!(DropReason::QueueFullClear.to_string(), "QUEUE_FULL_CLEAR");
        assert!(DropReason::QueueFullDropNew.is_overflow());
        assert!(!DropReason::ClearedByApi.is_overflow());
    }
}
