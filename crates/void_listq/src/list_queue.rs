//! List queue - the processor specialised for list operations
//!
//! Each executing operation reads the collaborator's current snapshot,
//! applies itself, and hands the result to [`SnapshotSource::commit`]. The
//! queue stays busy until the collaborator reports the commit, then runs the
//! operation's callback and moves on.

use crate::collaborator::SnapshotSource;
use crate::config::{QueueConfig, SchedulerKind};
use crate::error::{catch_panic, ExecuteResult};
use crate::event::DebugEvent;
use crate::policy::{DropReason, OverflowPolicy, QueuePolicy};
use crate::processor::{Completion, OperationProcessor, QueueHandler};
use crate::schedule::{InlineScheduler, Scheduler, WorkerScheduler};
use crate::stats::{InFlight, QueueStats};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use void_listops::Operation;

/// Observer for operations dropped before they ran
pub type DropListener<T> = Arc<dyn Fn(&Operation<T>, DropReason) + Send + Sync>;

/// Observer for finished operations; `false` means the operation failed
pub type CompletionListener<T> = Arc<dyn Fn(&Operation<T>, bool) + Send + Sync>;

struct Hooks<T> {
    source: Arc<dyn SnapshotSource<T>>,
    skip_unchanged: AtomicBool,
    drop_listener: RwLock<Option<DropListener<T>>>,
    completion_listener: RwLock<Option<CompletionListener<T>>>,
}

struct ListHandler<T> {
    hooks: Arc<Hooks<T>>,
}

impl<T> QueueHandler<Operation<T>> for ListHandler<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn operation_name(&self, op: &Operation<T>) -> String {
        op.name().to_string()
    }

    fn execute(&self, op: &Operation<T>, done: Completion<Operation<T>>) -> ExecuteResult {
        let current = self.hooks.source.current_snapshot();
        let applied = op.apply(&current)?;

        let unchanged = applied.change.is_none() || applied.items == current;
        if self.hooks.skip_unchanged.load(Ordering::Acquire) && unchanged {
            log::trace!("'{}' left the list unchanged; skipping commit", op.name());
            done.complete(true);
            return Ok(());
        }

        self.hooks
            .source
            .commit(applied.items, applied.change, Box::new(move || done.complete(true)));
        Ok(())
    }

    fn on_complete(&self, op: &Operation<T>, success: bool) {
        if success {
            if let Some(callback) = op.callback() {
                if let Err(message) = catch_panic(|| callback()) {
                    log::error!("Error in operation callback: {}: {}", op.name(), message);
                }
            }
        }

        let listener = self.hooks.completion_listener.read().clone();
        if let Some(listener) = listener {
            listener(op, success);
        }
    }

    fn on_drop(&self, op: Operation<T>, reason: DropReason) {
        let listener = self.hooks.drop_listener.read().clone();
        if let Some(listener) = listener {
            listener(&op, reason);
        }
    }
}

/// Sequential mutation queue for a list owned by a [`SnapshotSource`]
pub struct ListQueue<T: Send + Sync + 'static> {
    processor: OperationProcessor<Operation<T>>,
    hooks: Arc<Hooks<T>>,
}

impl<T: Send + Sync + 'static> Clone for ListQueue<T> {
    fn clone(&self) -> Self {
        Self {
            processor: self.processor.clone(),
            hooks: Arc::clone(&self.hooks),
        }
    }
}

impl<T> ListQueue<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Queue that runs its loop on the calling thread
    pub fn new(source: Arc<dyn SnapshotSource<T>>) -> Self {
        Self::with_scheduler(source, Arc::new(InlineScheduler))
    }

    /// Queue that runs its loop on `scheduler`
    pub fn with_scheduler(
        source: Arc<dyn SnapshotSource<T>>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let hooks = Arc::new(Hooks {
            source,
            skip_unchanged: AtomicBool::new(false),
            drop_listener: RwLock::new(None),
            completion_listener: RwLock::new(None),
        });
        let handler = ListHandler {
            hooks: Arc::clone(&hooks),
        };
        Self {
            processor: OperationProcessor::new(handler, scheduler),
            hooks,
        }
    }

    /// Queue built from a configuration; spawns a worker thread if asked to
    pub fn from_config(
        source: Arc<dyn SnapshotSource<T>>,
        config: &QueueConfig,
    ) -> io::Result<Self> {
        let scheduler: Arc<dyn Scheduler> = match config.scheduler {
            SchedulerKind::Inline => Arc::new(InlineScheduler),
            SchedulerKind::Worker => {
                let worker = WorkerScheduler::spawn(config.worker_name.clone())?;
                log::debug!("Queue loop runs on worker '{}'", worker.name());
                Arc::new(worker)
            }
        };

        let queue = Self::with_scheduler(source, scheduler);
        queue.set_queue_policy(config.max_pending, config.overflow_policy);
        queue.set_queue_merge_keys(config.merge_keys.iter().cloned());
        queue.set_skip_unchanged_commits(config.skip_unchanged_commits);

        log::debug!(
            "List queue ready (max_pending: {}, overflow: {}, scheduler: {})",
            config.max_pending,
            config.overflow_policy,
            config.scheduler
        );
        Ok(queue)
    }

    /// Admit an operation, subject to merge keys and the overflow policy
    pub fn enqueue(&self, op: impl Into<Operation<T>>) {
        self.processor.enqueue(op.into());
    }

    /// Drop everything pending and admit `op` alone
    pub fn clear_and_enqueue(&self, op: impl Into<Operation<T>>) {
        self.processor.clear_and_enqueue(op.into());
    }

    /// Drop everything pending; the running operation is unaffected
    pub fn clear_queue(&self) {
        self.processor.clear_queue();
    }

    pub fn set_queue_policy(&self, max_pending: usize, overflow_policy: OverflowPolicy) {
        self.processor.set_queue_policy(max_pending, overflow_policy);
    }

    pub fn set_queue_merge_keys<I, S>(&self, merge_keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.processor.set_queue_merge_keys(merge_keys);
    }

    /// Complete unchanged operations without calling `commit`
    pub fn set_skip_unchanged_commits(&self, skip: bool) {
        self.hooks.skip_unchanged.store(skip, Ordering::Release);
    }

    pub fn set_debug_listener<F>(&self, listener: F)
    where
        F: Fn(&DebugEvent) + Send + Sync + 'static,
    {
        self.processor.set_debug_listener(listener);
    }

    pub fn clear_debug_listener(&self) {
        self.processor.clear_debug_listener();
    }

    /// Observe every dropped operation together with the reason
    pub fn set_drop_listener<F>(&self, listener: F)
    where
        F: Fn(&Operation<T>, DropReason) + Send + Sync + 'static,
    {
        *self.hooks.drop_listener.write() = Some(Arc::new(listener));
    }

    /// Observe every finished operation; failures only report `false`
    pub fn set_completion_listener<F>(&self, listener: F)
    where
        F: Fn(&Operation<T>, bool) + Send + Sync + 'static,
    {
        *self.hooks.completion_listener.write() = Some(Arc::new(listener));
    }

    /// The collaborator's current snapshot
    pub fn snapshot(&self) -> Vec<T> {
        self.hooks.source.current_snapshot()
    }

    pub fn pending_len(&self) -> usize {
        self.processor.pending_len()
    }

    pub fn is_processing(&self) -> bool {
        self.processor.is_processing()
    }

    pub fn policy(&self) -> QueuePolicy {
        self.processor.policy()
    }

    pub fn merge_keys(&self) -> HashSet<String> {
        self.processor.merge_keys()
    }

    pub fn pending_names(&self) -> Vec<String> {
        self.processor.pending_names()
    }

    pub fn in_flight(&self) -> Option<InFlight> {
        self.processor.in_flight()
    }

    pub fn stats(&self) -> QueueStats {
        self.processor.stats()
    }

    /// Block until the queue drains, up to `timeout`
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.processor.wait_idle(timeout)
    }
}
