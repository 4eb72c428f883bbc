//! Operation processor - single-flight execution with bounded admission
//!
//! The processor owns the pending queue and the processing flag. Everything
//! operation-specific (naming, executing, completion, drop and error hooks)
//! lives behind [`QueueHandler`], and where the loop runs is decided by a
//! [`Scheduler`].
//!
//! # Invariants
//!
//! - At most one operation is executing at any time.
//! - Admitted operations start in admission order; only merge coalescing,
//!   overflow eviction and explicit clears remove entries, each reported
//!   with exactly one [`DropReason`].
//! - The queue lock is never held while handler code, hooks or listeners run.
//! - A failing or panicking operation still advances the loop.

use crate::error::{catch_panic, ExecuteError, ExecuteResult};
use crate::event::{DebugEvent, DebugListener, QueueEventType};
use crate::policy::{DropReason, OverflowPolicy, QueuePolicy};
use crate::schedule::Scheduler;
use crate::stats::{InFlight, QueueStats};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Operation-specific behaviour plugged into the processor
pub trait QueueHandler<O: Send + Sync + 'static>: Send + Sync {
    /// Name used for merge keys, logging and debug events
    fn operation_name(&self, op: &O) -> String;

    /// Start executing `op`
    ///
    /// `done` must be signalled exactly once, now or later, from any thread.
    /// Returning an error (or panicking) before signalling fails the
    /// operation and advances the queue.
    fn execute(&self, op: &O, done: Completion<O>) -> ExecuteResult;

    /// Called once per executed operation with its outcome
    fn on_complete(&self, _op: &O, _success: bool) {}

    /// Called once per operation that is dropped without running
    fn on_drop(&self, _op: O, _reason: DropReason) {}

    /// Called for execution failures and panicking hooks
    fn on_error(&self, message: &str) {
        log::error!("{}", message);
    }
}

struct Pending<O> {
    name: String,
    op: O,
}

struct QueueState<O> {
    pending: VecDeque<Pending<O>>,
    processing: bool,
    policy: QueuePolicy,
    merge_keys: HashSet<String>,
    in_flight: Option<InFlight>,
    stats: QueueStats,
    /// Transitions whose debug events have not been emitted yet
    unsettled: usize,
}

impl<O> QueueState<O> {
    fn is_idle(&self) -> bool {
        !self.processing && self.pending.is_empty() && self.unsettled == 0
    }
}

struct Inner<O: Send + Sync + 'static> {
    handler: Box<dyn QueueHandler<O>>,
    scheduler: Arc<dyn Scheduler>,
    state: Mutex<QueueState<O>>,
    idle: Condvar,
    debug_listener: RwLock<Option<DebugListener>>,
}

/// Shared completion bookkeeping between the loop and one [`Completion`]
#[derive(Default)]
struct Signal {
    fired: AtomicBool,
    executing: AtomicBool,
    dropped: AtomicBool,
}

/// Continuation for one executing operation
///
/// Signal it once the operation's effects are durable. Until then the
/// processor stays busy; there is no timeout. Dropping it unsignalled fails
/// the operation with [`ExecuteError::Abandoned`].
pub struct Completion<O: Send + Sync + 'static> {
    inner: Arc<Inner<O>>,
    op: Arc<O>,
    name: String,
    signal: Arc<Signal>,
}

impl<O: Send + Sync + 'static> Completion<O> {
    /// Name of the operation this continuation belongs to
    pub fn operation_name(&self) -> &str {
        &self.name
    }

    /// Finish the operation and advance the queue
    pub fn complete(self, success: bool) {
        if self.signal.fired.swap(true, Ordering::AcqRel) {
            log::warn!("Completion for '{}' signalled twice; ignoring", self.name);
            return;
        }
        self.inner.complete(&self.op, &self.name, success);
    }
}

impl<O: Send + Sync + 'static> Drop for Completion<O> {
    fn drop(&mut self) {
        // Pairs with the executing/dropped handshake in `process_next`.
        self.signal.dropped.store(true, Ordering::SeqCst);
        if self.signal.executing.load(Ordering::SeqCst) {
            return;
        }
        if !self.signal.fired.swap(true, Ordering::AcqRel) {
            self.inner.fail(&self.op, &self.name, ExecuteError::Abandoned);
        }
    }
}

impl<O: Send + Sync + 'static> Inner<O> {
    fn emit(&self, make: impl FnOnce() -> DebugEvent) {
        let listener = self.debug_listener.read().clone();
        if let Some(listener) = listener {
            let event = make();
            if let Err(message) = catch_panic(|| listener(&event)) {
                log::warn!("Debug listener panicked: {}", message);
            }
        }
    }

    fn report_error(&self, message: &str) {
        // Nothing sensible to do if the error hook itself blows up.
        let _ = catch_panic(|| self.handler.on_error(message));
    }

    fn report_drop(
        &self,
        entry: Pending<O>,
        reason: DropReason,
        pending_size: usize,
        is_processing: bool,
    ) {
        let Pending { name, op } = entry;
        log::debug!("Dropped '{}' ({})", name, reason);

        if let Err(message) = catch_panic(|| self.handler.on_drop(op, reason)) {
            self.report_error(&format!("Error in drop hook: {}: {}", name, message));
        }
        self.emit(|| {
            DebugEvent::new(QueueEventType::Dropped, Some(name), pending_size, is_processing)
                .with_drop_reason(reason)
        });
    }

    fn schedule_next(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        self.scheduler.schedule(Box::new(move || inner.process_next()));
    }

    fn process_next(self: &Arc<Self>) {
        let (entry, pending_size) = {
            let mut state = self.state.lock();
            match state.pending.pop_front() {
                Some(entry) => {
                    state.in_flight = Some(InFlight::new(entry.name.clone()));
                    state.stats.started += 1;
                    let pending_size = state.pending.len();
                    (entry, pending_size)
                }
                None => {
                    state.processing = false;
                    state.in_flight = None;
                    self.idle.notify_all();
                    return;
                }
            }
        };

        let Pending { name, op } = entry;
        let op = Arc::new(op);
        log::debug!("Starting '{}' ({} pending)", name, pending_size);
        self.emit(|| {
            DebugEvent::new(QueueEventType::Started, Some(name.clone()), pending_size, true)
        });

        let signal = Arc::new(Signal::default());
        signal.executing.store(true, Ordering::SeqCst);
        let done = Completion {
            inner: Arc::clone(self),
            op: Arc::clone(&op),
            name: name.clone(),
            signal: Arc::clone(&signal),
        };

        let result = match catch_panic(|| self.handler.execute(&op, done)) {
            Ok(result) => result,
            Err(message) => Err(ExecuteError::Panicked(message)),
        };
        signal.executing.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => {
                if signal.dropped.load(Ordering::SeqCst)
                    && !signal.fired.swap(true, Ordering::AcqRel)
                {
                    self.fail(&op, &name, ExecuteError::Abandoned);
                }
            }
            Err(error) => {
                if signal.fired.swap(true, Ordering::AcqRel) {
                    self.report_error(&format!(
                        "Error executing operation after completion: {}: {}",
                        name, error
                    ));
                } else {
                    self.fail(&op, &name, error);
                }
            }
        }
    }

    fn fail(self: &Arc<Self>, op: &O, name: &str, error: ExecuteError) {
        self.report_error(&format!("Error executing operation: {}: {}", name, error));

        let (pending_size, is_processing) = {
            let state = self.state.lock();
            (state.pending.len(), state.processing)
        };
        self.emit(|| {
            DebugEvent::new(
                QueueEventType::Error,
                Some(name.to_string()),
                pending_size,
                is_processing,
            )
            .with_message(error.to_string())
        });

        self.complete(op, name, false);
    }

    fn complete(self: &Arc<Self>, op: &O, name: &str, success: bool) {
        if let Err(message) = catch_panic(|| self.handler.on_complete(op, success)) {
            self.report_error(&format!("Error in operation completion: {}: {}", name, message));
        }

        let (has_next, pending_size, is_processing) = {
            let mut state = self.state.lock();
            state.in_flight = None;
            if success {
                state.stats.completed += 1;
            } else {
                state.stats.failed += 1;
            }
            let has_next = !state.pending.is_empty();
            if !has_next {
                state.processing = false;
            }
            state.unsettled += 1;
            (has_next, state.pending.len(), state.processing)
        };

        log::trace!("Completed '{}' (success: {})", name, success);
        self.emit(|| {
            let event = DebugEvent::new(
                QueueEventType::Completed,
                Some(name.to_string()),
                pending_size,
                is_processing,
            );
            if success {
                event
            } else {
                event.with_message("failed")
            }
        });
        self.settle();

        if has_next {
            self.schedule_next();
        }
    }

    /// Mark one transition's events as delivered, waking idle waiters
    fn settle(&self) {
        let mut state = self.state.lock();
        state.unsettled -= 1;
        if state.is_idle() {
            self.idle.notify_all();
        }
    }
}

/// Sequential processor for queued operations
pub struct OperationProcessor<O: Send + Sync + 'static> {
    inner: Arc<Inner<O>>,
}

impl<O: Send + Sync + 'static> Clone for OperationProcessor<O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<O: Send + Sync + 'static> OperationProcessor<O> {
    /// Create an idle processor with an unbounded queue
    pub fn new<H>(handler: H, scheduler: Arc<dyn Scheduler>) -> Self
    where
        H: QueueHandler<O> + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                handler: Box::new(handler),
                scheduler,
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    processing: false,
                    policy: QueuePolicy::default(),
                    merge_keys: HashSet::new(),
                    in_flight: None,
                    stats: QueueStats::default(),
                    unsettled: 0,
                }),
                idle: Condvar::new(),
                debug_listener: RwLock::new(None),
            }),
        }
    }

    /// Update capacity and overflow policy; `max_pending == 0` means unbounded
    ///
    /// Applies to the next admission decision only; nothing already pending
    /// is evicted.
    pub fn set_queue_policy(&self, max_pending: usize, overflow_policy: OverflowPolicy) {
        self.inner.state.lock().policy = QueuePolicy::new(max_pending, overflow_policy);
    }

    /// Replace the set of operation names that coalesce at the queue tail
    pub fn set_queue_merge_keys<I, S>(&self, merge_keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let merge_keys: HashSet<String> = merge_keys.into_iter().map(Into::into).collect();
        self.inner.state.lock().merge_keys = merge_keys;
    }

    /// Install the debug listener, replacing any previous one
    pub fn set_debug_listener<F>(&self, listener: F)
    where
        F: Fn(&DebugEvent) + Send + Sync + 'static,
    {
        *self.inner.debug_listener.write() = Some(Arc::new(listener));
    }

    /// Remove the debug listener
    pub fn clear_debug_listener(&self) {
        *self.inner.debug_listener.write() = None;
    }

    /// Admit `op` subject to merge coalescing and the overflow policy
    pub fn enqueue(&self, op: O) {
        let name = self.inner.handler.operation_name(&op);
        let mut dropped: Vec<(Pending<O>, DropReason)> = Vec::new();

        let (admitted, pending_size, is_processing, should_start) = {
            let mut state = self.inner.state.lock();

            let merges = state.merge_keys.contains(&name)
                && state.pending.back().map_or(false, |tail| tail.name == name);
            if merges {
                if let Some(tail) = state.pending.pop_back() {
                    dropped.push((tail, DropReason::Merged));
                }
            }

            let incoming = Pending {
                name: name.clone(),
                op,
            };
            let mut admitted = true;
            if state.policy.is_full(state.pending.len()) {
                match state.policy.overflow_policy() {
                    OverflowPolicy::DropNew => {
                        dropped.push((incoming, DropReason::QueueFullDropNew));
                        admitted = false;
                    }
                    OverflowPolicy::DropOldest => {
                        if let Some(head) = state.pending.pop_front() {
                            dropped.push((head, DropReason::QueueFullDropOldest));
                        }
                        state.pending.push_back(incoming);
                    }
                    OverflowPolicy::ClearAndEnqueue => {
                        let evicted = state.pending.drain(..);
                        dropped.extend(evicted.map(|p| (p, DropReason::QueueFullClear)));
                        state.pending.push_back(incoming);
                    }
                }
            } else {
                state.pending.push_back(incoming);
            }

            if admitted {
                state.stats.enqueued += 1;
            }
            state.stats.record_drops(dropped.iter().map(|(_, reason)| *reason));
            let pending_size = state.pending.len();
            state.stats.record_pending(pending_size);

            let should_start = !state.pending.is_empty() && !state.processing;
            if should_start {
                state.processing = true;
            }
            state.unsettled += 1;
            (admitted, pending_size, state.processing, should_start)
        };

        for (entry, reason) in dropped {
            self.inner.report_drop(entry, reason, pending_size, is_processing);
        }
        if admitted {
            log::debug!("Enqueued '{}' ({} pending)", name, pending_size);
            self.inner.emit(|| {
                DebugEvent::new(QueueEventType::Enqueued, Some(name), pending_size, is_processing)
            });
        }
        self.inner.settle();
        if should_start {
            self.inner.schedule_next();
        }
    }

    /// Drop everything pending and admit `op` as the only pending operation
    ///
    /// Bypasses merge keys and capacity; an operation already executing is
    /// left alone.
    pub fn clear_and_enqueue(&self, op: O) {
        let name = self.inner.handler.operation_name(&op);

        let (dropped, pending_size, is_processing, should_start) = {
            let mut state = self.inner.state.lock();
            let dropped: Vec<Pending<O>> = state.pending.drain(..).collect();
            state.pending.push_back(Pending {
                name: name.clone(),
                op,
            });

            state.stats.enqueued += 1;
            state.stats.record_drops(dropped.iter().map(|_| DropReason::ClearedExplicit));
            let pending_size = state.pending.len();
            state.stats.record_pending(pending_size);

            let should_start = !state.processing;
            if should_start {
                state.processing = true;
            }
            state.unsettled += 1;
            (dropped, pending_size, state.processing, should_start)
        };

        let cleared = !dropped.is_empty();
        for entry in dropped {
            self.inner
                .report_drop(entry, DropReason::ClearedExplicit, pending_size, is_processing);
        }
        if cleared {
            self.inner.emit(|| {
                DebugEvent::new(
                    QueueEventType::Cleared,
                    Some(name.clone()),
                    pending_size,
                    is_processing,
                )
                .with_drop_reason(DropReason::ClearedExplicit)
            });
        }
        log::debug!("Cleared queue and enqueued '{}'", name);
        self.inner.emit(|| {
            DebugEvent::new(QueueEventType::Enqueued, Some(name), pending_size, is_processing)
        });
        self.inner.settle();

        if should_start {
            self.inner.schedule_next();
        }
    }

    /// Drop everything pending without admitting anything
    ///
    /// An operation already executing still completes normally.
    pub fn clear_queue(&self) {
        let (dropped, is_processing) = {
            let mut state = self.inner.state.lock();
            let dropped: Vec<Pending<O>> = state.pending.drain(..).collect();
            state.stats.record_drops(dropped.iter().map(|_| DropReason::ClearedByApi));
            if !dropped.is_empty() {
                state.unsettled += 1;
            }
            (dropped, state.processing)
        };
        if dropped.is_empty() {
            return;
        }

        log::debug!("Clearing {} pending operation(s)", dropped.len());
        for entry in dropped {
            self.inner.report_drop(entry, DropReason::ClearedByApi, 0, is_processing);
        }
        self.inner.emit(|| {
            DebugEvent::new(QueueEventType::Cleared, None, 0, is_processing)
                .with_drop_reason(DropReason::ClearedByApi)
        });
        self.inner.settle();
    }

    /// Number of admitted operations that have not started
    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Whether an operation is executing (or about to be)
    pub fn is_processing(&self) -> bool {
        self.inner.state.lock().processing
    }

    /// Current capacity settings
    pub fn policy(&self) -> QueuePolicy {
        self.inner.state.lock().policy
    }

    /// Current merge keys
    pub fn merge_keys(&self) -> HashSet<String> {
        self.inner.state.lock().merge_keys.clone()
    }

    /// Names of pending operations, head first
    pub fn pending_names(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .pending
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }

    /// Snapshot of the activity counters
    pub fn stats(&self) -> QueueStats {
        self.inner.state.lock().stats.clone()
    }

    /// The operation currently executing, with how long it has been running
    pub fn in_flight(&self) -> Option<InFlight> {
        self.inner.state.lock().in_flight.clone()
    }

    /// Block until nothing is pending or executing, up to `timeout`
    ///
    /// Returns whether the queue went idle. Must not be called from the
    /// thread that signals completions (or runs the scheduler), or it will
    /// wait out the full timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !state.is_idle() {
            if self.inner.idle.wait_until(&mut state, deadline).timed_out() {
                return state.is_idle();
            }
        }
        true
    }
}
