//! Cross-thread handoff to the thread that owns the graphics context.
//!
//! Background loaders do file I/O and CPU-side parsing, but graphics-API
//! calls must run on the owning thread. They are submitted here and run when
//! the owning thread drains the queue, once per frame or while it pumps
//! inside a blocking asset wait.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use ember_core::profiling::profile_scope;
use parking_lot::{Condvar, Mutex};

/// Outcome of [`MainThreadQueue::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The caller is the owning thread; the task already ran.
    Inline,
    /// Queued without waiting.
    Queued,
    /// Queued, and the owning thread ran it before `submit` returned.
    Completed,
    /// The task was dropped without running (queue closed or torn down).
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompletionState {
    Pending,
    Done,
    Cancelled,
}

/// Per-submission completion flag for `wait = true` submissions.
struct Completion {
    state: Mutex<CompletionState>,
    signal: Condvar,
}

impl Completion {
    fn new() -> Self {
        Self {
            state: Mutex::new(CompletionState::Pending),
            signal: Condvar::new(),
        }
    }

    fn finish(&self, outcome: CompletionState) {
        let mut state = self.state.lock();
        if *state == CompletionState::Pending {
            *state = outcome;
            self.signal.notify_all();
        }
    }

    fn wait(&self) -> CompletionState {
        let mut state = self.state.lock();
        while *state == CompletionState::Pending {
            self.signal.wait(&mut state);
        }
        *state
    }
}

struct QueuedTask {
    task: Option<Box<dyn FnOnce() + Send>>,
    completion: Option<Arc<Completion>>,
}

impl QueuedTask {
    fn run(mut self) {
        if let Some(task) = self.task.take() {
            task();
        }
        if let Some(completion) = self.completion.take() {
            completion.finish(CompletionState::Done);
        }
    }
}

impl Drop for QueuedTask {
    // Reached with a pending completion only if the task never ran or panicked.
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            completion.finish(CompletionState::Cancelled);
        }
    }
}

/// Counters for a [`MainThreadQueue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MainThreadStats {
    /// Tasks appended to the queue.
    pub submitted: u64,
    /// Tasks run inline because the submitter was the owning thread.
    pub inline: u64,
    /// Queued tasks run by a drain.
    pub executed: u64,
    /// Queued tasks dropped without running.
    pub cancelled: u64,
}

/// FIFO of tasks that must run on one specific thread.
pub struct MainThreadQueue {
    owner: ThreadId,
    pending: Mutex<Vec<QueuedTask>>,
    closed: AtomicBool,
    submitted: AtomicU64,
    inline: AtomicU64,
    executed: AtomicU64,
    cancelled: AtomicU64,
}

impl Default for MainThreadQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MainThreadQueue {
    /// A queue owned by the calling thread.
    pub fn new() -> Self {
        Self::for_thread(thread::current().id())
    }

    /// A queue owned by `owner`.
    pub fn for_thread(owner: ThreadId) -> Self {
        Self {
            owner,
            pending: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            submitted: AtomicU64::new(0),
            inline: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
        }
    }

    /// The thread that runs queued tasks.
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Check if the calling thread is the owner.
    pub fn is_owning_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Run `task` on the owning thread.
    ///
    /// On the owning thread the task runs inline immediately. Elsewhere it is
    /// appended to the queue, and with `wait` the caller blocks until a drain
    /// has run it.
    pub fn submit<F>(&self, task: F, wait: bool) -> Submission
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_owning_thread() {
            self.inline.fetch_add(1, Ordering::Relaxed);
            task();
            return Submission::Inline;
        }

        if self.closed.load(Ordering::Acquire) {
            self.cancelled.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Main-thread queue is closed, dropping task");
            return Submission::Cancelled;
        }

        let completion = wait.then(|| Arc::new(Completion::new()));
        let queued = QueuedTask {
            task: Some(Box::new(task)),
            completion: completion.clone(),
        };

        {
            let mut pending = self.pending.lock();
            // Re-checked under the lock so `close` cannot miss this task.
            if self.closed.load(Ordering::Acquire) {
                drop(pending);
                drop(queued);
                self.cancelled.fetch_add(1, Ordering::Relaxed);
                return Submission::Cancelled;
            }
            pending.push(queued);
        }
        self.submitted.fetch_add(1, Ordering::Relaxed);

        match completion {
            None => Submission::Queued,
            Some(completion) => match completion.wait() {
                CompletionState::Done => Submission::Completed,
                _ => Submission::Cancelled,
            },
        }
    }

    /// Run `f` on the owning thread and return its result.
    ///
    /// Returns `None` if the task was cancelled before it ran.
    pub fn run_blocking<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_owning_thread() {
            self.inline.fetch_add(1, Ordering::Relaxed);
            return Some(f());
        }

        let result = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&result);
        match self.submit(move || *slot.lock() = Some(f()), true) {
            Submission::Completed => result.lock().take(),
            _ => None,
        }
    }

    /// Run every queued task in submission order. Owning thread only.
    ///
    /// The pending list is swapped out under the lock and the tasks run with
    /// the lock released; tasks submitted meanwhile wait for the next drain.
    pub fn drain(&self) -> usize {
        if !self.is_owning_thread() {
            tracing::error!(
                "MainThreadQueue::drain called from {:?}, which does not own the queue",
                thread::current().id()
            );
            return 0;
        }

        let tasks = std::mem::take(&mut *self.pending.lock());
        if tasks.is_empty() {
            return 0;
        }

        profile_scope!("main_thread_drain");
        let count = tasks.len();
        for task in tasks {
            task.run();
            self.executed.fetch_add(1, Ordering::Relaxed);
        }
        tracing::trace!("Drained {} main-thread task(s)", count);
        count
    }

    /// Refuse further submissions and cancel everything still queued.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let tasks = std::mem::take(&mut *self.pending.lock());
        if !tasks.is_empty() {
            tracing::warn!("Cancelling {} queued main-thread task(s)", tasks.len());
            self.cancelled.fetch_add(tasks.len() as u64, Ordering::Relaxed);
        }
    }

    /// Check if [`Self::close`] was called. A closed queue cancels tasks
    /// submitted from other threads.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Tasks waiting for the next drain.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Snapshot of the queue's counters.
    pub fn stats(&self) -> MainThreadStats {
        MainThreadStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            inline: self.inline.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

impl Drop for MainThreadQueue {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for MainThreadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainThreadQueue")
            .field("owner", &self.owner)
            .field("pending", &self.pending_len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_submit_on_owner_runs_inline() {
        let queue = MainThreadQueue::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        assert_eq!(queue.submit(move || flag.store(true, Ordering::SeqCst), true), Submission::Inline);
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(queue.stats().submitted, 0);
        assert_eq!(queue.stats().inline, 1);
    }

    #[test]
    fn test_background_submit_runs_on_drain_in_order() {
        let queue = Arc::new(MainThreadQueue::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let worker = {
            let queue = Arc::clone(&queue);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                for i in 0..3 {
                    let order = Arc::clone(&order);
                    assert_eq!(queue.submit(move || order.lock().push(i), false), Submission::Queued);
                }
            })
        };
        worker.join().unwrap();

        assert!(order.lock().is_empty());
        assert_eq!(queue.drain(), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(queue.stats().executed, 3);
    }

    #[test]
    fn test_waiting_submit_blocks_until_drained() {
        let queue = Arc::new(MainThreadQueue::new());
        let owner = thread::current().id();
        let ran_on = Arc::new(Mutex::new(None));

        let worker = {
            let queue = Arc::clone(&queue);
            let ran_on = Arc::clone(&ran_on);
            thread::spawn(move || {
                queue.submit(move || *ran_on.lock() = Some(thread::current().id()), true)
            })
        };

        while !worker.is_finished() {
            queue.drain();
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(worker.join().unwrap(), Submission::Completed);
        assert_eq!(*ran_on.lock(), Some(owner));
    }

    #[test]
    fn test_run_blocking_returns_value() {
        let queue = Arc::new(MainThreadQueue::new());
        let worker = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.run_blocking(|| 6 * 7))
        };
        while !worker.is_finished() {
            queue.drain();
            thread::yield_now();
        }
        assert_eq!(worker.join().unwrap(), Some(42));
        assert_eq!(queue.run_blocking(|| "inline"), Some("inline"));
    }

    #[test]
    fn test_close_cancels_waiters() {
        let queue = Arc::new(MainThreadQueue::new());
        let waiting = Arc::new(AtomicUsize::new(0));

        let worker = {
            let queue = Arc::clone(&queue);
            let waiting = Arc::clone(&waiting);
            thread::spawn(move || {
                waiting.fetch_add(1, Ordering::SeqCst);
                queue.submit(|| unreachable!("cancelled tasks never run"), true)
            })
        };

        while queue.pending_len() == 0 {
            thread::yield_now();
        }
        queue.close();
        assert_eq!(worker.join().unwrap(), Submission::Cancelled);
        assert_eq!(waiting.load(Ordering::SeqCst), 1);

        let late = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.submit(|| {}, false))
        };
        assert_eq!(late.join().unwrap(), Submission::Cancelled);
    }

    #[test]
    fn test_drain_from_other_thread_is_refused() {
        let queue = Arc::new(MainThreadQueue::new());
        let other = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.drain())
        };
        assert_eq!(other.join().unwrap(), 0);
    }
}
