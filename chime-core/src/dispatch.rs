//! Execution contexts.
//!
//! All observable state is mutated from a single coordination context, and
//! fire-and-forget preparation runs on a background context. Both are
//! expressed as a [`Dispatcher`] so hosts can plug in their own UI thread.

use std::sync::mpsc::{self, Sender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle, ThreadId};

/// A unit of work handed to a dispatcher.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs tasks, in submission order.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, task: Task);
}

/// Runs every task inline on the caller's thread.
///
/// Suitable for hosts that already serialize all calls, and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct Immediate;

impl Dispatcher for Immediate {
    fn dispatch(&self, task: Task) {
        task();
    }
}

/// A dedicated thread draining a FIFO of tasks.
pub struct SerialQueue {
    name: String,
    sender: Mutex<Option<Sender<Task>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    thread_id: Option<ThreadId>,
}

impl SerialQueue {
    /// Spawns the queue's thread.
    pub fn new(name: &str) -> Self {
        let (tx, rx) = mpsc::channel::<Task>();

        let worker = thread::Builder::new().name(name.to_string()).spawn(move || {
            while let Ok(task) = rx.recv() {
                task();
            }
        });

        let (worker, thread_id) = match worker {
            Ok(handle) => {
                let id = handle.thread().id();
                (Some(handle), Some(id))
            }
            Err(e) => {
                tracing::error!("Failed to spawn dispatch queue '{}': {}", name, e);
                (None, None)
            }
        };

        Self {
            name: name.to_string(),
            sender: Mutex::new(worker.as_ref().map(|_| tx)),
            worker: Mutex::new(worker),
            thread_id,
        }
    }

    /// Returns true when called from the queue's own thread.
    pub fn is_current(&self) -> bool {
        self.thread_id == Some(thread::current().id())
    }

    /// Blocks until every task queued before this call has run.
    ///
    /// Returns immediately when called from the queue's own thread, since
    /// waiting there could never complete.
    pub fn flush(&self) {
        if self.is_current() {
            tracing::warn!("flush() called on dispatch queue '{}' from its own thread", self.name);
            return;
        }
        let (tx, rx) = mpsc::channel::<()>();
        self.dispatch(Box::new(move || {
            let _ = tx.send(());
        }));
        // A closed channel means the queue is gone; nothing left to wait for.
        let _ = rx.recv();
    }
}

impl Dispatcher for SerialQueue {
    fn dispatch(&self, task: Task) {
        let sent = match self.sender.lock() {
            Ok(sender) => match sender.as_ref() {
                Some(tx) => tx.send(task).is_ok(),
                None => false,
            },
            Err(_) => false,
        };
        if !sent {
            tracing::warn!("Dispatch queue '{}' is closed, dropping task", self.name);
        }
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish queued tasks and exit.
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        if self.is_current() {
            return;
        }
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }
    }
}

/// Holds tasks until told to run them.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct ManualQueue {
    tasks: Mutex<Vec<Task>>,
}

#[cfg(test)]
impl ManualQueue {
    /// Runs the tasks queued so far, in order. Returns how many ran.
    pub(crate) fn run_all(&self) -> usize {
        let tasks: Vec<Task> = self.tasks.lock().unwrap().drain(..).collect();
        let n = tasks.len();
        for task in tasks {
            task();
        }
        n
    }
}

#[cfg(test)]
impl Dispatcher for ManualQueue {
    fn dispatch(&self, task: Task) {
        self.tasks.lock().unwrap().push(task);
    }
}
