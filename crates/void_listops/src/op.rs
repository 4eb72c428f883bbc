//! Operations - pure snapshot transforms
//!
//! An operation reads the current snapshot and returns the next one. Indices
//! are signed so callers can forward "no position" sentinels (e.g. `-1`)
//! straight through; anything negative fails validation instead of wrapping.

use crate::change::ListChange;
use crate::error::{ListOpError, ListOpResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Stable operation names, used for logging and merge keys
pub mod names {
    pub const REPLACE_ALL: &str = "ReplaceAll";
    pub const APPEND: &str = "Append";
    pub const INSERT_AT: &str = "InsertAt";
    pub const APPEND_ALL: &str = "AppendAll";
    pub const INSERT_ALL_AT: &str = "InsertAllAt";
    pub const REMOVE_AT: &str = "RemoveAt";
    pub const REMOVE_VALUE: &str = "RemoveValue";
    pub const CLEAR: &str = "Clear";
    pub const MOVE: &str = "Move";
    pub const REPLACE_AT: &str = "ReplaceAt";

    /// Every operation name, in declaration order
    pub const ALL: [&str; 10] = [
        REPLACE_ALL,
        APPEND,
        INSERT_AT,
        APPEND_ALL,
        INSERT_ALL_AT,
        REMOVE_AT,
        REMOVE_VALUE,
        CLEAR,
        MOVE,
        REPLACE_AT,
    ];
}

/// The payload of a list mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ListOp<T> {
    /// Replace the whole list
    ReplaceAll { items: Vec<T> },
    /// Add one item at the end
    Append { item: T },
    /// Insert one item at `index` (0..=len)
    InsertAt { index: isize, item: T },
    /// Add several items at the end
    AppendAll { items: Vec<T> },
    /// Insert several items at `index` (0..=len)
    InsertAllAt { index: isize, items: Vec<T> },
    /// Remove the item at `index` (0..len)
    RemoveAt { index: isize },
    /// Remove the first item equal to `item`
    RemoveValue { item: T },
    /// Remove everything
    Clear,
    /// Move one item from `from` to `to` (both 0..len)
    Move { from: isize, to: isize },
    /// Replace the item at `index` (0..len)
    ReplaceAt { index: isize, item: T },
}

/// Output of a successful apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied<T> {
    /// The next snapshot
    pub items: Vec<T>,
    /// What changed between the input and `items`
    pub change: ListChange,
}

impl<T> Applied<T> {
    fn new(items: Vec<T>, change: ListChange) -> Self {
        Self { items, change }
    }
}

fn insert_position(index: isize, len: usize) -> Option<usize> {
    usize::try_from(index).ok().filter(|&i| i <= len)
}

fn access_position(index: isize, len: usize) -> Option<usize> {
    usize::try_from(index).ok().filter(|&i| i < len)
}

impl<T> ListOp<T> {
    /// Stable name of this operation
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReplaceAll { .. } => names::REPLACE_ALL,
            Self::Append { .. } => names::APPEND,
            Self::InsertAt { .. } => names::INSERT_AT,
            Self::AppendAll { .. } => names::APPEND_ALL,
            Self::InsertAllAt { .. } => names::INSERT_ALL_AT,
            Self::RemoveAt { .. } => names::REMOVE_AT,
            Self::RemoveValue { .. } => names::REMOVE_VALUE,
            Self::Clear => names::CLEAR,
            Self::Move { .. } => names::MOVE,
            Self::ReplaceAt { .. } => names::REPLACE_AT,
        }
    }
}

impl<T: Clone + PartialEq> ListOp<T> {
    /// Apply to a snapshot, producing the next snapshot
    ///
    /// `ReplaceAll`, `Clear`, `Append` and `AppendAll` never fail. The rest
    /// validate their indices (or membership) against `current`.
    pub fn apply(&self, current: &[T]) -> ListOpResult<Applied<T>> {
        let len = current.len();
        match self {
            Self::ReplaceAll { items } => Ok(Applied::new(items.clone(), ListChange::Full)),

            Self::Append { item } => {
                let mut next = current.to_vec();
                next.push(item.clone());
                Ok(Applied::new(
                    next,
                    ListChange::Insert {
                        position: len,
                        count: 1,
                    },
                ))
            }

            Self::InsertAt { index, item } => {
                let position = insert_position(*index, len)
                    .ok_or(ListOpError::InsertOutOfRange { index: *index, len })?;
                let mut next = current.to_vec();
                next.insert(position, item.clone());
                Ok(Applied::new(next, ListChange::Insert { position, count: 1 }))
            }

            Self::AppendAll { items } => {
                if items.is_empty() {
                    return Ok(Applied::new(current.to_vec(), ListChange::None));
                }
                let mut next = current.to_vec();
                next.extend_from_slice(items);
                Ok(Applied::new(
                    next,
                    ListChange::Insert {
                        position: len,
                        count: items.len(),
                    },
                ))
            }

            Self::InsertAllAt { index, items } => {
                // An empty batch is a no-op regardless of where it was aimed.
                if items.is_empty() {
                    return Ok(Applied::new(current.to_vec(), ListChange::None));
                }
                let position = insert_position(*index, len)
                    .ok_or(ListOpError::InsertOutOfRange { index: *index, len })?;
                let mut next = Vec::with_capacity(len + items.len());
                next.extend_from_slice(&current[..position]);
                next.extend_from_slice(items);
                next.extend_from_slice(&current[position..]);
                Ok(Applied::new(
                    next,
                    ListChange::Insert {
                        position,
                        count: items.len(),
                    },
                ))
            }

            Self::RemoveAt { index } => {
                let position = access_position(*index, len)
                    .ok_or(ListOpError::RemoveOutOfRange { index: *index, len })?;
                let mut next = current.to_vec();
                next.remove(position);
                Ok(Applied::new(next, ListChange::Remove { position, count: 1 }))
            }

            Self::RemoveValue { item } => {
                let position = current
                    .iter()
                    .position(|existing| existing == item)
                    .ok_or(ListOpError::ItemNotFound)?;
                let mut next = current.to_vec();
                next.remove(position);
                Ok(Applied::new(next, ListChange::Remove { position, count: 1 }))
            }

            Self::Clear => {
                let change = if len == 0 {
                    ListChange::None
                } else {
                    ListChange::Remove {
                        position: 0,
                        count: len,
                    }
                };
                Ok(Applied::new(Vec::new(), change))
            }

            Self::Move { from, to } => {
                let out_of_range = ListOpError::MoveOutOfRange {
                    from: *from,
                    to: *to,
                    len,
                };
                let from_pos = access_position(*from, len).ok_or_else(|| out_of_range.clone())?;
                let to_pos = access_position(*to, len).ok_or(out_of_range)?;
                if from_pos == to_pos {
                    return Ok(Applied::new(current.to_vec(), ListChange::None));
                }
                let mut next = current.to_vec();
                let moved = next.remove(from_pos);
                // `to` was validated against the input length, so it still fits.
                next.insert(to_pos.min(next.len()), moved);
                Ok(Applied::new(
                    next,
                    ListChange::Move {
                        from: from_pos,
                        to: to_pos,
                    },
                ))
            }

            Self::ReplaceAt { index, item } => {
                let position = access_position(*index, len)
                    .ok_or(ListOpError::ReplaceOutOfRange { index: *index, len })?;
                let mut next = current.to_vec();
                next[position] = item.clone();
                Ok(Applied::new(next, ListChange::Change { position, count: 1 }))
            }
        }
    }
}

/// Callback fired once the collaborator has committed an operation's snapshot
pub type CompletionCallback = Arc<dyn Fn() + Send + Sync>;

/// An immutable list command: payload plus optional completion callback
#[derive(Clone)]
pub struct Operation<T> {
    op: ListOp<T>,
    callback: Option<CompletionCallback>,
}

impl<T> Operation<T> {
    /// Wrap a payload with no callback
    pub fn new(op: ListOp<T>) -> Self {
        Self { op, callback: None }
    }

    pub fn replace_all(items: impl Into<Vec<T>>) -> Self {
        Self::new(ListOp::ReplaceAll {
            items: items.into(),
        })
    }

    pub fn append(item: T) -> Self {
        Self::new(ListOp::Append { item })
    }

    pub fn insert_at(index: isize, item: T) -> Self {
        Self::new(ListOp::InsertAt { index, item })
    }

    pub fn append_all(items: impl Into<Vec<T>>) -> Self {
        Self::new(ListOp::AppendAll {
            items: items.into(),
        })
    }

    pub fn insert_all_at(index: isize, items: impl Into<Vec<T>>) -> Self {
        Self::new(ListOp::InsertAllAt {
            index,
            items: items.into(),
        })
    }

    pub fn remove_at(index: isize) -> Self {
        Self::new(ListOp::RemoveAt { index })
    }

    pub fn remove_value(item: T) -> Self {
        Self::new(ListOp::RemoveValue { item })
    }

    pub fn clear() -> Self {
        Self::new(ListOp::Clear)
    }

    pub fn move_item(from: isize, to: isize) -> Self {
        Self::new(ListOp::Move { from, to })
    }

    pub fn replace_at(index: isize, item: T) -> Self {
        Self::new(ListOp::ReplaceAt { index, item })
    }

    /// Attach a completion callback (builder pattern)
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Stable name of the wrapped payload
    pub fn name(&self) -> &'static str {
        self.op.name()
    }

    /// The wrapped payload
    pub fn op(&self) -> &ListOp<T> {
        &self.op
    }

    /// The completion callback, if one was attached
    pub fn callback(&self) -> Option<&CompletionCallback> {
        self.callback.as_ref()
    }
}

impl<T: Clone + PartialEq> Operation<T> {
    /// Apply the payload to a snapshot
    pub fn apply(&self, current: &[T]) -> ListOpResult<Applied<T>> {
        self.op.apply(current)
    }
}

impl<T> From<ListOp<T>> for Operation<T> {
    fn from(op: ListOp<T>) -> Self {
        Self::new(op)
    }
}

impl<T: fmt::Debug> fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("op", &self.op)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn list(items: &[&'static str]) -> Vec<&'static str> {
        items.to_vec()
    }

    #[test]
    fn test_replace_all_and_clear_never_fail() {
        let current = list(&["a", "b"]);

        let applied = Operation::replace_all(list(&["x"])).apply(&current).unwrap();
        assert_eq!(applied.items, list(&["x"]));
        assert_eq!(applied.change, ListChange::Full);

        let applied = Operation::<&str>::clear().apply(&current).unwrap();
        assert!(applied.items.is_empty());
        assert_eq!(
            applied.change,
            ListChange::Remove {
                position: 0,
                count: 2
            }
        );

        let applied = Operation::<&str>::clear().apply(&[]).unwrap();
        assert_eq!(applied.change, ListChange::None);
    }

    #[test]
    fn test_insert_bounds() {
        let current = list(&["a", "b"]);

        let applied = Operation::insert_at(2, "c").apply(&current).unwrap();
        assert_eq!(applied.items, list(&["a", "b", "c"]));

        let err = Operation::insert_at(3, "c").apply(&current).unwrap_err();
        assert_eq!(err, ListOpError::InsertOutOfRange { index: 3, len: 2 });

        let err = Operation::insert_at(-1, "c").apply(&current).unwrap_err();
        assert_eq!(err, ListOpError::InsertOutOfRange { index: -1, len: 2 });
    }

    #[test]
    fn test_insert_all_at_middle() {
        let current = list(&["a", "d"]);
        let applied = Operation::insert_all_at(1, list(&["b", "c"])).apply(&current).unwrap();
        assert_eq!(applied.items, list(&["a", "b", "c", "d"]));
        assert_eq!(
            applied.change,
            ListChange::Insert {
                position: 1,
                count: 2
            }
        );
    }

    #[test]
    fn test_empty_batches_are_noops() {
        let current = list(&["a"]);
        let applied = Operation::insert_all_at(99, Vec::new()).apply(&current).unwrap();
        assert_eq!(applied.items, current);
        assert!(applied.change.is_none());

        let applied = Operation::append_all(Vec::new()).apply(&current).unwrap();
        assert!(applied.change.is_none());
    }

    #[test]
    fn test_remove_at_and_remove_value() {
        let current = list(&["a", "b", "b"]);

        let applied = Operation::remove_at(0).apply(&current).unwrap();
        assert_eq!(applied.items, list(&["b", "b"]));

        let err = Operation::<&str>::remove_at(-1).apply(&current).unwrap_err();
        assert_eq!(err, ListOpError::RemoveOutOfRange { index: -1, len: 3 });

        let applied = Operation::remove_value("b").apply(&current).unwrap();
        assert_eq!(applied.items, list(&["a", "b"]));
        assert_eq!(
            applied.change,
            ListChange::Remove {
                position: 1,
                count: 1
            }
        );

        let err = Operation::remove_value("z").apply(&current).unwrap_err();
        assert_eq!(err, ListOpError::ItemNotFound);
    }

    #[test]
    fn test_move() {
        let current = list(&["a", "d", "b", "c"]);

        let applied = Operation::<&str>::move_item(0, 2).apply(&current).unwrap();
        assert_eq!(applied.items, list(&["d", "b", "a", "c"]));

        let applied = Operation::<&str>::move_item(3, 0).apply(&current).unwrap();
        assert_eq!(applied.items, list(&["c", "a", "d", "b"]));

        let applied = Operation::<&str>::move_item(1, 1).apply(&current).unwrap();
        assert!(applied.change.is_none());

        let err = Operation::<&str>::move_item(0, 4).apply(&current).unwrap_err();
        assert_eq!(
            err,
            ListOpError::MoveOutOfRange {
                from: 0,
                to: 4,
                len: 4
            }
        );
    }

    #[test]
    fn test_replace_at() {
        let current = list(&["a", "b"]);
        let applied = Operation::replace_at(1, "z").apply(&current).unwrap();
        assert_eq!(applied.items, list(&["a", "z"]));
        assert_eq!(
            applied.change,
            ListChange::Change {
                position: 1,
                count: 1
            }
        );

        assert!(Operation::replace_at(2, "z").apply(&current).is_err());
    }

    #[test]
    fn test_apply_does_not_touch_input() {
        let current = list(&["a", "b"]);
        let _ = Operation::append("c").apply(&current).unwrap();
        assert_eq!(current, list(&["a", "b"]));
    }

    #[test]
    fn test_names_and_callback() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        let op = Operation::append(1).on_complete(move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(op.name(), names::APPEND);
        (op.callback().unwrap())();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let names: Vec<&str> = vec![
            Operation::<i32>::replace_all(vec![]).name(),
            Operation::<i32>::clear().name(),
            Operation::<i32>::move_item(0, 0).name(),
        ];
        assert_eq!(names, vec!["ReplaceAll", "Clear", "Move"]);
        assert_eq!(names::ALL.len(), 10);
    }

    #[test]
    fn test_list_op_serde_tag() {
        // The trace runner reads operations from TOML using this tagging.
        let json = r#"{"op":"insert_at","index":1,"item":"D"}"#;
        let op: ListOp<String> = serde_json::from_str(json).unwrap();
        assert_eq!(
            op,
            ListOp::InsertAt {
                index: 1,
                item: "D".to_string()
            }
        );

        let op: ListOp<String> = serde_json::from_str(r#"{"op":"clear"}"#).unwrap();
        assert_eq!(op, ListOp::Clear);
    }
}
