//! Snapshot collaborators - owners of the actual list
//!
//! The queue never mutates a list itself. It reads the current snapshot,
//! computes the next one, and hands it to a collaborator which publishes it
//! and then fires `on_committed`. Publishing may be immediate or happen on
//! another thread after a diff step; the queue waits either way.

use crate::error::catch_panic;
use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Mutex, RwLock};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use void_listops::ListChange;

/// Continuation fired once a committed snapshot is visible
pub type OnCommitted = Box<dyn FnOnce() + Send + 'static>;

/// The external owner of the list
pub trait SnapshotSource<T>: Send + Sync {
    /// The latest committed snapshot
    fn current_snapshot(&self) -> Vec<T>;

    /// Publish `snapshot`, then call `on_committed` exactly once
    ///
    /// After `on_committed` runs, `current_snapshot` must return `snapshot`
    /// (until the next commit). Dropping `on_committed` without calling it
    /// fails the operation.
    fn commit(&self, snapshot: Vec<T>, change: ListChange, on_committed: OnCommitted);
}

impl<T, S> SnapshotSource<T> for Arc<S>
where
    S: SnapshotSource<T> + ?Sized,
{
    fn current_snapshot(&self) -> Vec<T> {
        (**self).current_snapshot()
    }

    fn commit(&self, snapshot: Vec<T>, change: ListChange, on_committed: OnCommitted) {
        (**self).commit(snapshot, change, on_committed)
    }
}

/// In-memory list that commits synchronously on the caller's thread
pub struct SharedList<T> {
    items: RwLock<Vec<T>>,
    commits: AtomicU64,
}

impl<T: Clone> SharedList<T> {
    /// Create an empty list
    pub fn new() -> Self {
        Self::with_items(Vec::new())
    }

    /// Create a list with initial contents
    pub fn with_items(items: Vec<T>) -> Self {
        Self {
            items: RwLock::new(items),
            commits: AtomicU64::new(0),
        }
    }

    /// Copy of the current contents
    pub fn items(&self) -> Vec<T> {
        self.items.read().clone()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Number of commits applied so far
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Acquire)
    }
}

impl<T: Clone> Default for SharedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> SnapshotSource<T> for SharedList<T> {
    fn current_snapshot(&self) -> Vec<T> {
        self.items()
    }

    fn commit(&self, snapshot: Vec<T>, change: ListChange, on_committed: OnCommitted) {
        log::trace!("Committing {} item(s) ({:?})", snapshot.len(), change);
        *self.items.write() = snapshot;
        self.commits.fetch_add(1, Ordering::AcqRel);
        on_committed();
    }
}

struct CommitRequest<T> {
    snapshot: Vec<T>,
    change: ListChange,
    on_committed: OnCommitted,
}

/// In-memory list that publishes commits from a dedicated thread
///
/// Stands in for a renderer that diffs off-thread before applying: each
/// commit waits `latency` on the worker, is published, and `on_committed`
/// fires on the worker thread.
pub struct ThreadedList<T> {
    items: Arc<RwLock<Vec<T>>>,
    commits: Arc<AtomicU64>,
    sender: Mutex<Option<Sender<CommitRequest<T>>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Clone + Send + Sync + 'static> ThreadedList<T> {
    /// Spawn the commit thread
    pub fn spawn(initial: Vec<T>, latency: Duration) -> io::Result<Self> {
        let items = Arc::new(RwLock::new(initial));
        let commits = Arc::new(AtomicU64::new(0));
        let (sender, receiver) = unbounded::<CommitRequest<T>>();

        let worker_items = Arc::clone(&items);
        let worker_commits = Arc::clone(&commits);
        let handle = thread::Builder::new()
            .name("listq-commit".to_string())
            .spawn(move || {
                for request in receiver.iter() {
                    if !latency.is_zero() {
                        thread::sleep(latency);
                    }
                    log::trace!(
                        "Publishing {} item(s) ({:?})",
                        request.snapshot.len(),
                        request.change
                    );
                    *worker_items.write() = request.snapshot;
                    worker_commits.fetch_add(1, Ordering::AcqRel);
                    if let Err(message) = catch_panic(request.on_committed) {
                        log::error!("Commit continuation panicked: {}", message);
                    }
                }
            })?;

        Ok(Self {
            items,
            commits,
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Copy of the current contents
    pub fn items(&self) -> Vec<T> {
        self.items.read().clone()
    }

    /// Number of commits published so far
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Acquire)
    }

    /// Publish outstanding commits and stop the thread
    pub fn shutdown(&self) {
        self.sender.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("Commit thread terminated abnormally");
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> SnapshotSource<T> for ThreadedList<T> {
    fn current_snapshot(&self) -> Vec<T> {
        self.items()
    }

    fn commit(&self, snapshot: Vec<T>, change: ListChange, on_committed: OnCommitted) {
        let request = CommitRequest {
            snapshot,
            change,
            on_committed,
        };
        let sender = self.sender.lock().clone();
        let rejected = match sender {
            Some(sender) => sender.send(request).err().map(|e| e.into_inner()),
            None => Some(request),
        };
        // Dropped outside the lock: an abandoned continuation re-enters the queue.
        if let Some(request) = rejected {
            log::error!(
                "Commit thread is shut down; discarding {} item(s)",
                request.snapshot.len()
            );
        }
    }
}

impl<T> Drop for ThreadedList<T> {
    fn drop(&mut self) {
        self.sender.get_mut().take();
        if let Some(handle) = self.handle.get_mut().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                log::error!("Commit thread terminated abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_shared_list_commits_synchronously() {
        let list = SharedList::with_items(vec![1, 2]);
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = Arc::clone(&fired);

        list.commit(
            vec![3],
            ListChange::Full,
            Box::new(move || fired_clone.store(true, Ordering::SeqCst)),
        );

        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(list.current_snapshot(), vec![3]);
        assert_eq!(list.commit_count(), 1);
    }

    #[test]
    fn test_threaded_list_fires_on_commit_thread() {
        let list = ThreadedList::spawn(Vec::<u8>::new(), Duration::from_millis(5)).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);

        list.commit(
            vec![7],
            ListChange::Insert {
                position: 0,
                count: 1,
            },
            Box::new(move || {
                let name = thread::current().name().map(str::to_string);
                tx.send(name).unwrap();
            }),
        );

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("listq-commit"));
        assert_eq!(list.items(), vec![7]);

        list.shutdown();
        assert_eq!(list.commit_count(), 1);
    }

    #[test]
    fn test_threaded_list_discards_after_shutdown() {
        let list = ThreadedList::spawn(vec![1u8], Duration::ZERO).unwrap();
        list.shutdown();

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = Arc::clone(&fired);
        list.commit(
            vec![2],
            ListChange::Full,
            Box::new(move || fired_clone.store(true, Ordering::SeqCst)),
        );

        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(list.items(), vec![1]);
    }
}
