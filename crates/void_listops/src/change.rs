//! Change hints - what an operation did to the list
//!
//! A collaborator that renders the list can use the hint to skip a full
//! structural diff. The hint is advisory: the new snapshot is always the
//! source of truth.

use serde::{Deserialize, Serialize};

/// Positional description of a list transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListChange {
    /// Nothing changed
    None,
    /// The whole list was replaced; positions are meaningless
    Full,
    /// `count` items were inserted starting at `position`
    Insert { position: usize, count: usize },
    /// `count` items were removed starting at `position`
    Remove { position: usize, count: usize },
    /// `count` items were replaced in place starting at `position`
    Change { position: usize, count: usize },
    /// One item moved from `from` to `to`
    Move { from: usize, to: usize },
}

impl ListChange {
    /// Whether the hint describes any change at all
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl Default for ListChange {
    fn default() -> Self {
        Self::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_none() {
        assert!(ListChange::default().is_none());
        assert!(!ListChange::Full.is_none());
    }

    #[test]
    fn test_serde_form() {
        let json = serde_json::to_string(&ListChange::Move { from: 0, to: 2 }).unwrap();
        assert_eq!(json, r#"{"move":{"from":0,"to":2}}"#);
    }
}
