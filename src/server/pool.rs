//! The worker pool behind the pooled server.
//!
//! Accepted connections go into a FIFO queue; idle workers are (re)spawned
//! by the dispatcher and drain the queue until it runs dry. The queue mutex
//! protects the queue and the pause flag; each worker's own mutex protects
//! its thread handle, and its running flag is set before the thread object
//! is replaced and cleared only from within the worker once it stops
//! picking work.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace};

use crate::io::Connection;

/// How long an idle worker lingers on the condition variable before exiting.
const IDLE_LINGER: Duration = Duration::from_millis(50);

type ProcessFn = Arc<dyn Fn(usize, Connection) + Send + Sync>;

struct PoolState {
    queue: VecDeque<Connection>,
    pause: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    available: Condvar,
}

#[derive(Default)]
struct Worker {
    slot: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

pub(crate) struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: RwLock<Vec<Arc<Worker>>>,
    process: ProcessFn,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ThreadPool {
    pub fn new(pool_size: usize, process: ProcessFn) -> Self {
        assert!(pool_size >= 1, "pool size must be positive");
        Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState { queue: VecDeque::new(), pause: false }),
                available: Condvar::new(),
            }),
            workers: RwLock::new((0..pool_size).map(|_| Arc::default()).collect()),
            process,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.workers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Queues a connection and hands it (plus any other queued work) to idle
    /// workers.
    pub fn enqueue(&self, connection: Connection) {
        {
            let mut state = lock(&self.shared.state);
            state.queue.push_back(connection);
        }
        self.shared.available.notify_one();
        self.dispatch();
    }

    /// Scans the workers, joining any whose running flag is clear, and
    /// assigns each idle worker one queued connection.
    fn dispatch(&self) {
        let workers = self.workers.read().unwrap_or_else(PoisonError::into_inner);
        for (index, worker) in workers.iter().enumerate() {
            if worker.running.load(Ordering::Acquire) {
                continue;
            }
            let mut slot = lock(&worker.slot);
            if let Some(handle) = slot.take() {
                let _ = handle.join();
            }

            let first = {
                let mut state = lock(&self.shared.state);
                if state.pause {
                    None
                } else {
                    state.queue.pop_front()
                }
            };
            let Some(first) = first else {
                return;
            };

            worker.running.store(true, Ordering::Release);
            let worker = Arc::clone(worker);
            let shared = Arc::clone(&self.shared);
            let process = Arc::clone(&self.process);
            *slot = Some(thread::spawn(move || {
                worker_main(index, first, worker, shared, process)
            }));
        }
    }

    /// Blocks until every queued connection has been processed, then joins
    /// all workers. Illegal from inside a pooled thread.
    pub fn wait(&self) {
        self.assert_outside_workers("wait");

        {
            let mut state = lock(&self.shared.state);
            while !state.queue.is_empty() {
                state = self
                    .shared
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            state.pause = true;
        }
        self.shared.available.notify_all();
        self.join_workers();
        lock(&self.shared.state).pause = false;
        self.dispatch();
    }

    /// Pauses, joins, resizes the worker set, resumes. Illegal from inside a
    /// pooled thread; the size must stay positive.
    pub fn resize_pool(&self, pool_size: usize) {
        assert!(pool_size >= 1, "pool size must be positive");
        self.assert_outside_workers("resize_pool");

        lock(&self.shared.state).pause = true;
        self.shared.available.notify_all();
        self.join_workers();

        {
            let mut workers = self.workers.write().unwrap_or_else(PoisonError::into_inner);
            workers.resize_with(pool_size, Arc::default);
        }
        debug!(pool_size, "pool resized");

        lock(&self.shared.state).pause = false;
        self.dispatch();
    }

    fn join_workers(&self) {
        let workers = self.workers.read().unwrap_or_else(PoisonError::into_inner);
        for worker in workers.iter() {
            let handle = lock(&worker.slot).take();
            if let Some(handle) = handle {
                let _ = handle.join();
            }
        }
    }

    fn assert_outside_workers(&self, operation: &str) {
        let current = thread::current().id();
        let workers = self.workers.read().unwrap_or_else(PoisonError::into_inner);
        for worker in workers.iter() {
            let slot = lock(&worker.slot);
            if let Some(handle) = slot.as_ref() {
                assert!(
                    handle.thread().id() != current,
                    "{operation} called from inside a pooled thread"
                );
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        lock(&self.shared.state).pause = true;
        self.shared.available.notify_all();
        self.join_workers();
    }
}

fn worker_main(
    index: usize,
    first: Connection,
    worker: Arc<Worker>,
    shared: Arc<PoolShared>,
    process: ProcessFn,
) {
    trace!(worker = index, "worker started");
    process(index, first);
    shared.available.notify_all();

    loop {
        enum Next {
            Item(Connection),
            Exit,
        }

        let next = {
            // try_lock: a stalled dispatcher must not block this worker, and
            // slow I/O here must not stall dispatch
            let Ok(mut state) = shared.state.try_lock() else {
                thread::yield_now();
                continue;
            };
            if state.pause {
                worker.running.store(false, Ordering::Release);
                Next::Exit
            } else if let Some(item) = state.queue.pop_front() {
                Next::Item(item)
            } else {
                // idle: linger briefly on the condition variable
                let (mut state, _) = shared
                    .available
                    .wait_timeout(state, IDLE_LINGER)
                    .unwrap_or_else(PoisonError::into_inner);
                match if state.pause { None } else { state.queue.pop_front() } {
                    Some(item) => Next::Item(item),
                    None => {
                        // flag cleared under the queue lock so a racing
                        // enqueue observes an idle worker
                        worker.running.store(false, Ordering::Release);
                        Next::Exit
                    }
                }
            }
        };

        match next {
            Next::Item(connection) => {
                trace!(worker = index, "worker continuing");
                process(index, connection);
                shared.available.notify_all();
            }
            Next::Exit => break,
        }
    }

    trace!(worker = index, "worker stopping");
    shared.available.notify_all();
}
