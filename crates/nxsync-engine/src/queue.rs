//! Bounded-concurrency dispatcher over a batch of transfer tasks.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub success: bool,
    pub identifier: String,
}

type Handler<T> = Arc<dyn Fn(T) -> Pin<Box<dyn Future<Output = TaskOutcome> + Send>> + Send + Sync>;

struct Shared<T> {
    pending: Mutex<VecDeque<T>>,
    active: Mutex<usize>,
    done: Notify,
    outcomes: Mutex<Vec<TaskOutcome>>,
}

/// Dispatches items of type `T` to an async handler with at most
/// `max_concurrency` in flight at a time.
///
/// `start()` spawns exactly `max_concurrency` worker loops, each pulling the
/// next item from the shared pending deque until it's empty. Completion is
/// detected race-free: every worker that empties its own fetch checks
/// `pending.is_empty() && active == 0` under the same lock that protects
/// both fields, and whichever worker observes that state signals `done`.
pub struct TransferQueue<T: Send + 'static> {
    max_concurrency: usize,
    handler: Handler<T>,
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> TransferQueue<T> {
    pub fn new<F, Fut>(max_concurrency: usize, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskOutcome> + Send + 'static,
    {
        Self {
            max_concurrency: max_concurrency.max(1),
            handler: Arc::new(move |task| Box::pin(handler(task))),
            shared: Arc::new(Shared {
                pending: Mutex::new(VecDeque::new()),
                active: Mutex::new(0),
                done: Notify::new(),
                outcomes: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn set_queue(&self, tasks: Vec<T>) {
        let mut guard = self.shared.pending.lock().unwrap();
        *guard = tasks.into_iter().collect();
    }

    pub fn cancel(&self) {
        self.shared.pending.lock().unwrap().clear();
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().unwrap().len()
    }

    pub fn active_count(&self) -> usize {
        *self.shared.active.lock().unwrap()
    }

    pub fn is_idle(&self) -> bool {
        self.pending_count() == 0 && self.active_count() == 0
    }

    /// Dispatch all pending tasks and resolve once `pending` and `active`
    /// are both empty, returning every task's outcome.
    ///
    /// The `Notified` future is created before any worker is spawned, so a
    /// worker that finishes the whole batch before this task is polled again
    /// still wakes a registered waiter rather than signaling into the void.
    pub async fn start(&self) -> Vec<TaskOutcome> {
        if self.is_idle() {
            return Vec::new();
        }

        let notified = self.shared.done.notified();

        let workers = self.max_concurrency.min(self.pending_count().max(1));
        for _ in 0..workers {
            let shared = self.shared.clone();
            let handler = self.handler.clone();
            tokio::spawn(worker_loop(shared, handler));
        }

        notified.await;
        std::mem::take(&mut *self.shared.outcomes.lock().unwrap())
    }
}

async fn worker_loop<T: Send + 'static>(shared: Arc<Shared<T>>, handler: Handler<T>) {
    loop {
        let task = {
            let mut pending = shared.pending.lock().unwrap();
            let Some(task) = pending.pop_front() else {
                return;
            };
            *shared.active.lock().unwrap() += 1;
            task
        };

        let outcome = handler(task).await;
        shared.outcomes.lock().unwrap().push(outcome);

        let is_done = {
            let pending = shared.pending.lock().unwrap();
            let mut active = shared.active.lock().unwrap();
            *active -= 1;
            pending.is_empty() && *active == 0
        };
        if is_done {
            shared.done.notify_one();
        }
    }
}
