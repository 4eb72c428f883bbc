//! Schedulers - where the execution loop runs
//!
//! The processor never runs its loop directly; it hands a task to a
//! scheduler. Two flavours are provided:
//!
//! - [`InlineScheduler`] runs the task on the calling thread. Nested
//!   schedules (a synchronous commit completing inside the loop) are queued on
//!   a per-thread trampoline and drained by the outermost call, so the stack
//!   does not grow with the number of queued operations.
//! - [`WorkerScheduler`] posts tasks to one dedicated thread, so every
//!   apply and completion callback runs on that thread.

use crate::error::catch_panic;
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::thread::{self, JoinHandle, ThreadId};

/// A unit of work handed to a scheduler
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs queue tasks somewhere
pub trait Scheduler: Send + Sync {
    /// Run `task` now or later; tasks scheduled from one thread keep their order
    fn schedule(&self, task: Task);
}

thread_local! {
    static TRAMPOLINE: RefCell<Option<VecDeque<Task>>> = RefCell::new(None);
}

/// Resets the trampoline even if a task unwinds
struct TrampolineGuard;

impl Drop for TrampolineGuard {
    fn drop(&mut self) {
        TRAMPOLINE.with(|slot| *slot.borrow_mut() = None);
    }
}

/// Runs tasks on the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineScheduler;

impl Scheduler for InlineScheduler {
    fn schedule(&self, task: Task) {
        let first = TRAMPOLINE.with(|slot| {
            let mut slot = slot.borrow_mut();
            match slot.as_mut() {
                Some(queue) => {
                    queue.push_back(task);
                    None
                }
                None => {
                    *slot = Some(VecDeque::new());
                    Some(task)
                }
            }
        });

        // Already draining further up this thread's stack.
        let Some(first) = first else {
            return;
        };

        let _guard = TrampolineGuard;
        first();
        while let Some(next) =
            TRAMPOLINE.with(|slot| slot.borrow_mut().as_mut().and_then(VecDeque::pop_front))
        {
            next();
        }
    }
}

/// Runs tasks on a dedicated thread, in the order they were scheduled
pub struct WorkerScheduler {
    name: String,
    sender: Mutex<Option<Sender<Task>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl WorkerScheduler {
    /// Spawn the worker thread
    pub fn spawn(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let (sender, receiver) = unbounded::<Task>();

        let thread_name = name.clone();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            for task in receiver.iter() {
                if let Err(message) = catch_panic(task) {
                    log::error!("Task panicked on worker '{}': {}", thread_name, message);
                }
            }
            log::debug!("Worker '{}' drained and stopped", thread_name);
        })?;

        let thread_id = handle.thread().id();
        log::debug!("Worker '{}' started", name);

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
            thread_id,
        })
    }

    /// Worker thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the caller is running on the worker thread
    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Stop accepting tasks, let queued ones finish, and join the thread
    ///
    /// Called from the worker thread itself this only closes the channel.
    pub fn shutdown(&self) {
        self.sender.lock().take();

        if self.is_worker_thread() {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                log::error!("Worker '{}' terminated abnormally", self.name);
            }
        }
    }
}

impl Scheduler for WorkerScheduler {
    fn schedule(&self, task: Task) {
        match self.sender.lock().as_ref() {
            Some(sender) => {
                if sender.send(task).is_err() {
                    log::warn!("Worker '{}' is gone; task discarded", self.name);
                }
            }
            None => log::warn!("Worker '{}' is shut down; task discarded", self.name),
        }
    }
}

impl Drop for WorkerScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_inline_runs_immediately() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        InlineScheduler.schedule(Box::new(move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_inline_nested_schedules_are_flattened() {
        fn chain(remaining: usize, order: Arc<parking_lot::Mutex<Vec<usize>>>) {
            if remaining == 0 {
                return;
            }
            InlineScheduler.schedule(Box::new(move || {
                order.lock().push(remaining);
                chain(remaining - 1, Arc::clone(&order));
                // The nested task must not have run yet.
                assert_eq!(order.lock().last(), Some(&remaining));
            }));
        }

        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        // Deep enough to overflow the stack if nested schedules recursed.
        chain(100_000, Arc::clone(&order));
        assert_eq!(order.lock().len(), 100_000);
        assert_eq!(order.lock()[0], 100_000);
    }

    #[test]
    fn test_worker_runs_in_order_on_its_thread() {
        let worker = WorkerScheduler::spawn("listq-test-worker").unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();

        for i in 0..10 {
            let tx = tx.clone();
            worker.schedule(Box::new(move || {
                let name = thread::current().name().map(str::to_string);
                tx.send((i, name)).unwrap();
            }));
        }
        worker.shutdown();

        let received: Vec<_> = rx.try_iter().collect();
        assert_eq!(received.len(), 10);
        for (expected, (i, name)) in received.into_iter().enumerate() {
            assert_eq!(i, expected);
            assert_eq!(name.as_deref(), Some("listq-test-worker"));
        }
    }

    #[test]
    fn test_worker_survives_panicking_task() {
        let worker = WorkerScheduler::spawn("listq-panic-worker").unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        worker.schedule(Box::new(|| panic!("boom")));
        let hits_clone = Arc::clone(&hits);
        worker.schedule(Box::new(move || {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        }));
        worker.shutdown();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
