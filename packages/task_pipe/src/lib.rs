//! Time-budgeted pipe of deferred work.
//!
//! A `TaskPipe` is an ordered collection of unit-of-work tasks executed under a
//! caller-supplied time budget. Tasks may be added from any thread, whereas
//! `execute` is meant to be called by a single scheduling thread per pipe. A
//! task which wants to run again re-adds itself through a cloned handle rather
//! than the pipe re-queueing it implicitly.

#[macro_use]
extern crate tracing;

use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};
use parking_lot::Mutex;


/// A deferred unit of work.
pub trait Task: Send {
    /// Do the work. Consumes the task.
    fn run(self: Box<Self>);

    /// Release any resources held by a task that will never run because its
    /// pipe was stopped.
    fn cancel(self: Box<Self>) {}
}

impl<F: FnOnce() + Send> Task for F {
    fn run(self: Box<Self>) {
        (*self)()
    }
}


/// Cloneable handle to an ordered, time-budgeted queue of tasks.
#[derive(Clone, Default)]
pub struct TaskPipe(Arc<Shared>);

#[derive(Default)]
struct Shared {
    queue: Mutex<VecDeque<Box<dyn Task>>>,
    // approximate length, readable without taking the queue lock
    len: AtomicUsize,
    stopped: AtomicBool,
}

impl TaskPipe {
    /// Construct empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task to the back of the pipe.
    ///
    /// If the pipe has been stopped the task is not enqueued and its `cancel`
    /// is invoked instead.
    pub fn add<T: Task + 'static>(&self, task: T) {
        self.add_boxed(Box::new(task));
    }

    /// `add`, but pre-boxed.
    pub fn add_boxed(&self, task: Box<dyn Task>) {
        if self.0.stopped.load(Ordering::SeqCst) {
            task.cancel();
            return;
        }
        let mut queue = self.0.queue.lock();
        // re-check under the lock so stop() can't miss us mid-insert
        if self.0.stopped.load(Ordering::SeqCst) {
            drop(queue);
            task.cancel();
            return;
        }
        queue.push_back(task);
        self.0.len.store(queue.len(), Ordering::Relaxed);
    }

    /// Pop and run front tasks until the budget elapses, the pipe empties, or
    /// the pipe is stopped. Returns the number of tasks run.
    ///
    /// A panicking task is logged and does not abort the pass or propagate to
    /// the caller.
    pub fn execute(&self, budget: Duration) -> usize {
        self.execute_min(budget, 0)
    }

    /// `execute`, but runs at least `min_tasks` tasks (if present) even if the
    /// budget is already spent, to guarantee progress during lag spikes.
    pub fn execute_min(&self, budget: Duration, min_tasks: usize) -> usize {
        let start = Instant::now();
        let mut ran = 0;
        loop {
            if self.0.stopped.load(Ordering::SeqCst) {
                break;
            }
            if ran >= min_tasks && start.elapsed() >= budget {
                break;
            }
            let task = {
                let mut queue = self.0.queue.lock();
                let task = queue.pop_front();
                self.0.len.store(queue.len(), Ordering::Relaxed);
                task
            };
            let Some(task) = task else { break };
            // run outside the lock, so tasks can re-add themselves
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
                let msg = payload_str(&payload);
                error!("task panicked: {}", msg);
            }
            ran += 1;
        }
        ran
    }

    /// Mark the pipe terminal and cancel all queued tasks. Idempotent.
    pub fn stop(&self) {
        if self.0.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained = {
            let mut queue = self.0.queue.lock();
            self.0.len.store(0, Ordering::Relaxed);
            std::mem::take(&mut *queue)
        };
        for task in drained {
            task.cancel();
        }
    }

    /// Whether `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.0.stopped.load(Ordering::SeqCst)
    }

    /// Approximate number of queued tasks. Safe to call concurrently with
    /// `add` and `execute`.
    pub fn size(&self) -> usize {
        self.0.len.load(Ordering::Relaxed)
    }
}

fn payload_str(payload: &(dyn std::any::Any + Send)) -> &str {
    payload.downcast_ref::<&'static str>().copied()
        .or_else(|| payload.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("non-string panic payload")
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn fifo_order() {
        let pipe = TaskPipe::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        for i in 0..5 {
            let seen = Arc::clone(&seen);
            pipe.add(move || seen.lock().unwrap().push(i));
        }
        assert_eq!(pipe.size(), 5);
        let ran = pipe.execute(Duration::from_secs(1));
        assert_eq!(ran, 5);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(pipe.size(), 0);
    }

    #[test]
    fn zero_budget_respects_min() {
        let pipe = TaskPipe::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = Arc::clone(&count);
            pipe.add(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(pipe.execute(Duration::ZERO), 0);
        assert_eq!(pipe.execute_min(Duration::ZERO, 1), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_task_does_not_stop_pass() {
        let pipe = TaskPipe::new();
        let count = Arc::new(AtomicUsize::new(0));
        pipe.add(|| panic!("boom"));
        {
            let count = Arc::clone(&count);
            pipe.add(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(pipe.execute(Duration::from_secs(1)), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    struct CancelProbe(Arc<AtomicUsize>);

    impl Task for CancelProbe {
        fn run(self: Box<Self>) {}

        fn cancel(self: Box<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn stop_cancels_queued_and_rejects_later_adds() {
        let pipe = TaskPipe::new();
        let cancelled = Arc::new(AtomicUsize::new(0));
        pipe.add(CancelProbe(Arc::clone(&cancelled)));
        pipe.add(CancelProbe(Arc::clone(&cancelled)));
        pipe.stop();
        pipe.stop();
        assert_eq!(cancelled.load(Ordering::SeqCst), 2);
        assert_eq!(pipe.size(), 0);

        pipe.add(CancelProbe(Arc::clone(&cancelled)));
        assert_eq!(cancelled.load(Ordering::SeqCst), 3);
        assert_eq!(pipe.execute(Duration::from_secs(1)), 0);
    }

    #[test]
    fn task_can_requeue_itself() {
        let pipe = TaskPipe::new();
        let count = Arc::new(AtomicUsize::new(0));

        struct Counting {
            pipe: TaskPipe,
            count: Arc<AtomicUsize>,
        }

        impl Task for Counting {
            fn run(self: Box<Self>) {
                let n = self.count.fetch_add(1, Ordering::SeqCst);
                if n + 1 < 4 {
                    let pipe = self.pipe.clone();
                    pipe.add_boxed(self);
                }
            }
        }

        pipe.add(Counting { pipe: pipe.clone(), count: Arc::clone(&count) });
        // each pass runs whatever is queued, re-added work included
        pipe.execute(Duration::from_secs(1));
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }
}
