//! A fixed size pool of worker threads.
//!
//! Every worker owns a slot. A slot runs at most one task at a time, and
//! [`WorkerPool::go`] blocks the caller until a slot is free, so there are never
//! more than [`WorkerPool::size`] tasks executing and no task is ever queued.
//!
//! A task that panics does not take its slot down with it: the panic is caught,
//! logged, and the worker carries on with the next task on the same slot.
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use hydro::pool::WorkerPool;
//!
//! let pool = WorkerPool::new(4).unwrap();
//! let counter = Arc::new(AtomicUsize::new(0));
//!
//! for _ in 0..16 {
//!     let counter = counter.clone();
//!     pool.go(move || { counter.fetch_add(1, Ordering::SeqCst); }).unwrap();
//! }
//!
//! pool.wait();
//! assert_eq!(counter.load(Ordering::SeqCst), 16);
//! ```
//!
//! [`WorkerPool::go`]: struct.WorkerPool.html#method.go
//! [`WorkerPool::size`]: struct.WorkerPool.html#method.size
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::errors::{Error, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

// -----------------------------------------------------------------------------
// 		- Shared pool state -
// -----------------------------------------------------------------------------
struct Shared {
    // One task channel per slot, emptied on close
    slots: Mutex<Vec<Sender<Task>>>,
    busy: Mutex<Vec<bool>>,
    // Signalled whenever a slot becomes free
    freed: Condvar,
    // Signalled when `in_flight` drops to zero
    drained: Condvar,
    in_flight: AtomicUsize,
    closed: AtomicBool,
}

impl Shared {
    fn release(&self, index: usize) {
        let mut busy = self.busy.lock();
        busy[index] = false;
        let remaining = self.in_flight.fetch_sub(1, Ordering::AcqRel) - 1;
        self.freed.notify_one();
        if remaining == 0 {
            self.drained.notify_all();
        }
    }

    fn work(&self, index: usize, tasks: Receiver<Task>) {
        for task in tasks.iter() {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(task)) {
                error!("worker {}: task panicked: {}", index, panic_message(&*panic));
            }
            self.release(index);
        }
        debug!("worker {} stopped", index);
    }
}

// -----------------------------------------------------------------------------
// 		- Worker pool -
// -----------------------------------------------------------------------------
/// Run closures on a bounded number of threads.
pub struct WorkerPool {
    shared: Arc<Shared>,
    size: usize,
}

impl WorkerPool {
    /// Start a pool with `max_workers` workers.
    /// All workers are spawned up front. A size of zero is bumped to one.
    pub fn new(max_workers: usize) -> Result<Self> {
        if max_workers == 0 {
            warn!("worker pool size of zero requested, using one worker");
        }
        let size = max_workers.max(1);

        let mut slots = Vec::with_capacity(size);
        let mut receivers = Vec::with_capacity(size);
        for _ in 0..size {
            let (tx, rx) = bounded(1);
            slots.push(tx);
            receivers.push(rx);
        }

        let shared = Arc::new(Shared {
            slots: Mutex::new(slots),
            busy: Mutex::new(vec![false; size]),
            freed: Condvar::new(),
            drained: Condvar::new(),
            in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });

        let pool = Self { shared, size };

        for (index, tasks) in receivers.into_iter().enumerate() {
            let shared = pool.shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("hydro-worker-{}", index))
                .spawn(move || shared.work(index, tasks));

            // Dropping `pool` here closes the workers already started
            if let Err(e) = spawned {
                return Err(Error::Spawn(e.to_string()));
            }
        }

        Ok(pool)
    }

    /// Run `task` on the first free worker.
    ///
    /// Blocks until a worker is free. The only error is `Error::PoolClosed`;
    /// whatever happens inside the task (including a panic) is never
    /// reported back to the caller.
    pub fn go<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let index = self.reserve()?;

        let sender = self.shared.slots.lock().get(index).cloned();
        let sent = match sender {
            Some(sender) => sender.send(Box::new(task)).is_ok(),
            None => false,
        };

        if sent {
            Ok(())
        } else {
            self.shared.release(index);
            Err(Error::PoolClosed)
        }
    }

    // Mark the first idle slot as busy, waiting for one if there is none.
    fn reserve(&self) -> Result<usize> {
        let mut busy = self.shared.busy.lock();
        loop {
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(Error::PoolClosed);
            }

            if let Some(index) = busy.iter().position(|running| !running) {
                busy[index] = true;
                self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
                return Ok(index);
            }

            self.shared.freed.wait(&mut busy);
        }
    }

    /// Block until no task is executing.
    pub fn wait(&self) {
        let mut busy = self.shared.busy.lock();
        while self.shared.in_flight.load(Ordering::Acquire) > 0 {
            self.shared.drained.wait(&mut busy);
        }
    }

    /// Number of tasks currently executing
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Number of workers
    pub fn size(&self) -> usize {
        self.size
    }

    /// `true` once the pool has been closed
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Close the pool.
    ///
    /// Workers finish the task they are running and exit. Callers blocked
    /// in `go` are woken up and get `Error::PoolClosed`.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.slots.lock().clear();

        let _busy = self.shared.busy.lock();
        self.shared.freed.notify_all();
        debug!("worker pool closed");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}

/// Best effort text of a caught panic payload
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".into()
    }
}
