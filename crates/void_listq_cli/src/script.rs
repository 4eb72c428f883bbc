//! Operation scripts
//!
//! ```toml
//! initial = ["a", "b"]
//! async_commit_ms = 5     # commit on a separate thread; omit for synchronous
//!
//! [queue]
//! max_pending = 2
//! overflow_policy = "DROP_OLDEST"
//!
//! [[ops]]
//! op = "insert_at"
//! index = 1
//! item = "c"
//!
//! [[ops]]
//! op = "clear"
//! clear_and_enqueue = true
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use void_listq::{ConfigError, ListOp, QueueConfig};

/// Errors running a script
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Failed to read script {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse script: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Queue did not drain within {waited:?}")]
    Timeout {
        waited: Duration,
        /// Operation still waiting for its commit
        in_flight: Option<String>,
    },

    #[error("Failed to encode output: {0}")]
    Json(#[from] serde_json::Error),
}

/// One scripted operation
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptOp {
    #[serde(flatten)]
    pub op: ListOp<String>,
    /// Supersede everything pending instead of a normal enqueue
    #[serde(default)]
    pub clear_and_enqueue: bool,
}

/// A complete script
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct Script {
    pub queue: QueueConfig,
    pub initial: Vec<String>,
    /// Commit latency on a separate thread; `None` commits synchronously
    pub async_commit_ms: Option<u64>,
    pub ops: Vec<ScriptOp>,
}

impl Script {
    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let content = std::fs::read_to_string(path).map_err(|source| ScriptError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ScriptError> {
        let script: Self = toml::from_str(content)?;
        script.queue.validate()?;
        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use void_listq::{OverflowPolicy, SchedulerKind};

    #[test]
    fn test_parse_script() {
        let script = Script::parse(
            r#"
            initial = ["x"]
            async_commit_ms = 3

            [queue]
            max_pending = 2
            overflow_policy = "DROP_OLDEST"

            [[ops]]
            op = "insert_at"
            index = 0
            item = "a"

            [[ops]]
            op = "move"
            from = 1
            to = 0

            [[ops]]
            op = "clear"
            clear_and_enqueue = true
            "#,
        )
        .unwrap();

        assert_eq!(script.initial, vec!["x"]);
        assert_eq!(script.async_commit_ms, Some(3));
        assert_eq!(script.queue.overflow_policy, OverflowPolicy::DropOldest);
        assert_eq!(script.queue.scheduler, SchedulerKind::Inline);
        assert_eq!(
            script.ops,
            vec![
                ScriptOp {
                    op: ListOp::InsertAt {
                        index: 0,
                        item: "a".to_string(),
                    },
                    clear_and_enqueue: false,
                },
                ScriptOp {
                    op: ListOp::Move { from: 1, to: 0 },
                    clear_and_enqueue: false,
                },
                ScriptOp {
                    op: ListOp::Clear,
                    clear_and_enqueue: true,
                },
            ]
        );
    }

    #[test]
    fn test_negative_index_parses() {
        let script = Script::parse("[[ops]]\nop = \"remove_at\"\nindex = -1\n").unwrap();
        assert_eq!(script.ops[0].op, ListOp::RemoveAt { index: -1 });
    }

    #[test]
    fn test_unknown_op_rejected() {
        assert!(matches!(
            Script::parse("[[ops]]\nop = \"shuffle\"\n"),
            Err(ScriptError::Parse(_))
        ));
    }

    #[test]
    fn test_invalid_queue_config_rejected() {
        assert!(matches!(
            Script::parse("[queue]\nmerge_keys = [\"Nope\"]\n"),
            Err(ScriptError::Config(_))
        ));
    }
}
