//! The asynchronous client: a single worker thread pumps queued requests
//! and delivers results through callbacks on that thread.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::trace;

use crate::error::OperationStatus;
use crate::protocol::{Request, Response};

use super::Client;

type ResponseCallback = Box<dyn FnOnce(&mut Request, Response) + Send>;
type ConnectCallback = Box<dyn FnOnce(&mut Request) + Send>;
type ErrorCallback = Box<dyn FnOnce(&mut Request, OperationStatus) + Send>;

struct QueryItem {
    request: Request,
    on_response: ResponseCallback,
    on_connect: Option<ConnectCallback>,
    on_error: Option<ErrorCallback>,
}

struct AsyncState {
    items: VecDeque<QueryItem>,
    should_run: bool,
}

struct AsyncShared {
    state: Mutex<AsyncState>,
    available: Condvar,
}

/// A client that issues queries from a worker thread.
///
/// `async_query` enqueues a request; the worker connects, runs the exchange
/// and invokes the callbacks. `stop()` finishes the current item, then
/// drains.
pub struct AsyncClient {
    client: Arc<Client>,
    shared: Arc<AsyncShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AsyncClient {
    pub fn new(client: Client) -> Self {
        Self {
            client: Arc::new(client),
            shared: Arc::new(AsyncShared {
                state: Mutex::new(AsyncState { items: VecDeque::new(), should_run: true }),
                available: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn started(&self) -> bool {
        lock(&self.worker).is_some()
    }

    /// Spawns the pump thread; a no-op when already started.
    pub fn start(&self) {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return;
        }
        lock(&self.shared.state).should_run = true;

        let client = Arc::clone(&self.client);
        let shared = Arc::clone(&self.shared);
        *worker = Some(thread::spawn(move || pump(client, shared)));
    }

    /// Signals the pump thread and joins it; queued items are dropped.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.shared.state);
            state.should_run = false;
        }
        self.shared.available.notify_all();
        if let Some(handle) = lock(&self.worker).take() {
            let _ = handle.join();
        }
    }

    /// Queues a request; `on_response` runs on the worker thread when the
    /// exchange completes.
    pub fn async_query(
        &self,
        request: Request,
        on_response: impl FnOnce(&mut Request, Response) + Send + 'static,
    ) {
        self.push(QueryItem {
            request,
            on_response: Box::new(on_response),
            on_connect: None,
            on_error: None,
        });
    }

    /// Like [`AsyncClient::async_query`], with connect and error callbacks.
    pub fn async_query_with(
        &self,
        request: Request,
        on_response: impl FnOnce(&mut Request, Response) + Send + 'static,
        on_connect: impl FnOnce(&mut Request) + Send + 'static,
        on_error: impl FnOnce(&mut Request, OperationStatus) + Send + 'static,
    ) {
        self.push(QueryItem {
            request,
            on_response: Box::new(on_response),
            on_connect: Some(Box::new(on_connect)),
            on_error: Some(Box::new(on_error)),
        });
    }

    fn push(&self, item: QueryItem) {
        {
            let mut state = lock(&self.shared.state);
            state.items.push_back(item);
        }
        self.shared.available.notify_one();
    }
}

impl Drop for AsyncClient {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pump(client: Arc<Client>, shared: Arc<AsyncShared>) {
    loop {
        let item = {
            let mut state = lock(&shared.state);
            loop {
                if !state.should_run {
                    return;
                }
                if let Some(item) = state.items.pop_front() {
                    break item;
                }
                state = shared
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        execute(&client, item);
    }
}

fn execute(client: &Client, item: QueryItem) {
    let QueryItem { mut request, on_response, on_connect, on_error } = item;
    trace!(uri = %request.uri, "async query");

    client.process_request(&mut request);
    let connection = match client.connect(&request.uri) {
        Ok(connection) => connection,
        Err(status) => {
            if let Some(on_error) = on_error {
                on_error(&mut request, status);
            }
            return;
        }
    };

    if let Some(on_connect) = on_connect {
        on_connect(&mut request);
    }

    match client.get_response(connection, &mut request) {
        Ok(response) => on_response(&mut request, response),
        Err(status) => {
            if let Some(on_error) = on_error {
                on_error(&mut request, status);
            }
        }
    }
}
