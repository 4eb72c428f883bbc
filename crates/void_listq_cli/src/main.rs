//! listq - replay a script of list operations through the mutation queue
//!
//! Prints every queue transition as it happens, then the final list and
//! activity counters. Queue settings come from the script's `[queue]` table
//! (or a separate `--config` file) and may be overridden with `LISTQ_*`
//! environment variables.

mod script;

use clap::Parser;
use parking_lot::Mutex;
use script::{Script, ScriptError};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use void_listq::{
    DebugEvent, DropReason, ListQueue, Operation, QueueConfig, SharedList, SnapshotSource,
    ThreadedList,
};

/// Where events and the summary are written
type Output = Arc<Mutex<dyn Write + Send>>;

#[derive(Parser)]
#[command(name = "listq")]
#[command(about = "Replay list operations through a sequential mutation queue", long_about = None)]
struct Cli {
    /// Script to run (TOML)
    script: PathBuf,

    /// Queue config file (TOML); replaces the script's `[queue]` table
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print events and the result as JSON lines
    #[arg(long)]
    json: bool,

    /// Seconds to wait for the queue to drain (fractions allowed)
    #[arg(short, long, default_value = "30", value_parser = parse_timeout)]
    timeout: Duration,
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value.parse().map_err(|e| format!("{}", e))?;
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("{}", e))
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let stdout: Output = Arc::new(Mutex::new(io::stdout()));
    if let Err(e) = run(&cli, stdout) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli, out: Output) -> Result<(), ScriptError> {
    let script = Script::load(&cli.script)?;
    log::info!(
        "Loaded {} operation(s) from {}",
        script.ops.len(),
        cli.script.display()
    );

    let config = match &cli.config {
        Some(path) => QueueConfig::load(Some(path.as_path()))?,
        None => script.queue.clone().resolve()?,
    };

    let source: Arc<dyn SnapshotSource<String>> = match script.async_commit_ms {
        Some(ms) => Arc::new(ThreadedList::spawn(
            script.initial.clone(),
            Duration::from_millis(ms),
        )?),
        None => Arc::new(SharedList::with_items(script.initial.clone())),
    };
    let queue = ListQueue::from_config(Arc::clone(&source), &config)?;

    let json = cli.json;
    let events = Arc::clone(&out);
    queue.set_debug_listener(move |event: &DebugEvent| {
        if let Err(e) = write_event(&mut *events.lock(), event, json) {
            log::warn!("Failed to write event: {}", e);
        }
    });
    queue.set_drop_listener(|op: &Operation<String>, reason: DropReason| {
        log::debug!("{:?} dropped ({})", op.op(), reason);
    });

    for (index, entry) in script.ops.into_iter().enumerate() {
        let name = entry.op.name();
        let operation = Operation::new(entry.op).on_complete(move || {
            log::debug!("#{} {} committed", index, name);
        });
        if entry.clear_and_enqueue {
            queue.clear_and_enqueue(operation);
        } else {
            queue.enqueue(operation);
        }
    }

    let waited = cli.timeout;
    if !queue.wait_idle(waited) {
        let in_flight = queue.in_flight();
        if let Some(in_flight) = &in_flight {
            log::error!(
                "'{}' has been waiting for its commit for {:?}",
                in_flight.name,
                in_flight.elapsed()
            );
        }
        return Err(ScriptError::Timeout {
            waited,
            in_flight: in_flight.map(|f| f.name),
        });
    }
    queue.clear_debug_listener();

    let items = source.current_snapshot();
    let stats = queue.stats();
    let mut out = out.lock();
    if json {
        let summary = serde_json::json!({ "final": items, "stats": stats });
        writeln!(out, "{}", serde_json::to_string(&summary)?)?;
    } else {
        writeln!(out)?;
        writeln!(out, "Final list ({} item(s)): {:?}", items.len(), items)?;
        writeln!(
            out,
            "enqueued={} dropped={} overflowed={} started={} completed={} failed={} \
             peak_pending={}",
            stats.enqueued,
            stats.dropped,
            stats.overflowed,
            stats.started,
            stats.completed,
            stats.failed,
            stats.peak_pending
        )?;
    }
    out.flush()?;
    Ok(())
}

fn write_event(out: &mut dyn Write, event: &DebugEvent, json: bool) -> Result<(), ScriptError> {
    if json {
        writeln!(out, "{}", serde_json::to_string(event)?)?;
    } else {
        writeln!(out, "{}", event)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::fs;
    use tempfile::tempdir;

    fn cli(script: PathBuf, json: bool, timeout: &str) -> Cli {
        Cli {
            script,
            config: None,
            json,
            timeout: parse_timeout(timeout).unwrap(),
        }
    }

    fn output_lines(buffer: &Arc<Mutex<Vec<u8>>>) -> Vec<String> {
        let text = String::from_utf8(buffer.lock().clone()).unwrap();
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_json_summary_follows_last_event() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trace.toml");
        fs::write(
            &path,
            r#"
            async_commit_ms = 1

            [[ops]]
            op = "replace_all"
            items = ["A", "B", "C"]

            [[ops]]
            op = "remove_value"
            item = "B"
            "#,
        )
        .unwrap();

        let buffer = Arc::new(Mutex::new(Vec::<u8>::new()));
        run(&cli(path, true, "10"), buffer.clone()).unwrap();

        let lines = output_lines(&buffer);
        let summary: Value = serde_json::from_str(lines.last().unwrap()).unwrap();
        assert_eq!(summary["final"], serde_json::json!(["A", "C"]));
        assert_eq!(summary["stats"]["completed"], 2);

        let last_event: Value = serde_json::from_str(&lines[lines.len() - 2]).unwrap();
        assert_eq!(last_event["event_type"], "COMPLETED");
        assert_eq!(last_event["operation_name"], "RemoveValue");
    }

    #[test]
    fn test_stalled_commit_times_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("slow.toml");
        fs::write(&path, "async_commit_ms = 300\n\n[[ops]]\nop = \"append\"\nitem = \"x\"\n")
            .unwrap();

        let buffer = Arc::new(Mutex::new(Vec::<u8>::new()));
        let err = run(&cli(path, false, "0.02"), buffer.clone()).unwrap_err();

        match err {
            ScriptError::Timeout { in_flight, .. } => {
                assert_eq!(in_flight.as_deref(), Some("Append"));
            }
            other => panic!("expected a timeout, got {}", other),
        }
    }

    #[test]
    fn test_config_file_replaces_script_queue() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("ops.toml");
        let config = dir.path().join("queue.toml");
        fs::write(
            &script,
            "[queue]\nmax_pending = 0\n\n[[ops]]\nop = \"append\"\nitem = \"x\"\n",
        )
        .unwrap();
        fs::write(&config, "merge_keys = [\"Nope\"]\n").unwrap();

        let mut args = cli(script, false, "10");
        args.config = Some(config);
        let buffer = Arc::new(Mutex::new(Vec::<u8>::new()));

        let err = run(&args, buffer.clone()).unwrap_err();
        assert!(matches!(err, ScriptError::Config(_)));
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("0.25"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_timeout("30"), Ok(Duration::from_secs(30)));
        assert!(parse_timeout("-1").is_err());
        assert!(parse_timeout("soon").is_err());
    }

    #[test]
    fn test_text_summary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ops.toml");
        fs::write(&path, "initial = [\"a\"]\n\n[[ops]]\nop = \"clear\"\n").unwrap();

        let buffer = Arc::new(Mutex::new(Vec::<u8>::new()));
        run(&cli(path, false, "10"), buffer.clone()).unwrap();

        let lines = output_lines(&buffer);
        assert!(lines.iter().any(|l| l == "Final list (0 item(s)): []"));
        assert!(lines.last().unwrap().contains("completed=1"));
    }
}
