//! Broadcast
//!
//! A [`Broadcaster`] owns one ingress queue and a registry of named receivers.
//! Values sent to the broadcaster are picked up by a dispatch thread and
//! copied to every receiver.
//!
//! Each receiver has a courier thread that pushes its copies into the
//! receiver's queue one at a time, in the order they were sent. For every
//! copy the dispatch thread also submits a watch task to a [`WorkerPool`]
//! with a deadline taken at fan-out. A receiver whose courier has not handed
//! over a copy by its deadline is evicted: it is removed from the registry
//! and closed, so its consumer sees `Error::Closed` once it has drained what
//! was already delivered. The deadline is kept by the watch task, so a queue
//! that blocks in `send` for any reason is evicted all the same.
//!
//! [`Broadcaster`]: struct.Broadcaster.html
//! [`WorkerPool`]: ../../pool/struct.WorkerPool.html
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};

use crate::errors::{Error, Result};
use crate::pool::{panic_message, WorkerPool};

use super::queue::{Queue, QueueConstructor, QueueHandle};
use super::signal::Signal;

/// Time a receiver is given to accept a value before it is evicted
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Name passed to the queue constructor for the ingress queue
pub const INGRESS_NAME: &str = "main";

const DEFAULT_WORKERS: usize = 64;

// How often the dispatch thread looks at the cancel signal while the
// ingress is empty
const CANCEL_POLL: Duration = Duration::from_millis(100);

// -----------------------------------------------------------------------------
//              - Config -
// -----------------------------------------------------------------------------
/// Broadcaster settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastConfig {
    /// Number of workers watching deliveries to receivers
    pub workers: usize,
    /// How long after fan-out a receiver has to accept a value before it is
    /// evicted
    pub delivery_timeout: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }
}

impl BroadcastConfig {
    /// Set the number of workers
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the delivery timeout
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }
}

// -----------------------------------------------------------------------------
//              - Subscription -
//              a registered receiver and the courier feeding it
// -----------------------------------------------------------------------------
#[derive(Default)]
struct Progress {
    // Copies the courier is done with, delivered or not
    delivered: u64,
    // Set once the receiver is removed, evicted or the broadcaster closed
    gone: bool,
}

struct Subscription<T> {
    queue: QueueHandle<T>,
    inbox: Mutex<Option<Sender<T>>>,
    // Copies handed to the courier. Only the dispatch thread bumps this.
    sent: AtomicU64,
    progress: Mutex<Progress>,
    progressed: Condvar,
}

impl<T: Send + 'static> Subscription<T> {
    fn start(queue: QueueHandle<T>) -> Result<Arc<Self>> {
        let (inbox, courier_inbox) = unbounded();
        let sub = Arc::new(Self {
            queue,
            inbox: Mutex::new(Some(inbox)),
            sent: AtomicU64::new(0),
            progress: Mutex::new(Progress::default()),
            progressed: Condvar::new(),
        });

        let courier = Arc::clone(&sub);
        thread::Builder::new()
            .name("hydro-courier".into())
            .spawn(move || courier.carry(courier_inbox))
            .map_err(|e| Error::Spawn(e.to_string()))?;

        Ok(sub)
    }

    fn name(&self) -> &str {
        self.queue.name()
    }

    // Courier loop. Ends once `shut` drops the sending half and the
    // remaining copies have been skipped.
    fn carry(&self, inbox: Receiver<T>) {
        for value in inbox.iter() {
            if !self.progress.lock().gone {
                match panic::catch_unwind(AssertUnwindSafe(|| self.queue.send(value))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!("delivery to `{}` failed: {}", self.name(), e),
                    Err(panic) => error!(
                        "delivery to `{}` panicked: {}",
                        self.name(),
                        panic_message(&*panic)
                    ),
                }
            }

            let mut progress = self.progress.lock();
            progress.delivered += 1;
            self.progressed.notify_all();
        }
        trace!("courier for `{}` stopped", self.name());
    }

    // Hand a copy to the courier and return its sequence number, or `None`
    // if the receiver is already shut.
    fn enqueue(&self, value: T) -> Option<u64> {
        let inbox = self.inbox.lock();
        inbox.as_ref()?.send(value).ok()?;
        Some(self.sent.fetch_add(1, Ordering::AcqRel) + 1)
    }

    // `false` if copy `seq` is still with the courier at `deadline`
    fn await_delivery(&self, seq: u64, deadline: Instant) -> bool {
        let mut progress = self.progress.lock();
        while progress.delivered < seq && !progress.gone {
            if self.progressed.wait_until(&mut progress, deadline).timed_out() {
                return progress.delivered >= seq || progress.gone;
            }
        }
        true
    }

    fn shut(&self) {
        self.inbox.lock().take();
        {
            let mut progress = self.progress.lock();
            progress.gone = true;
            self.progressed.notify_all();
        }
        self.queue.close();
    }
}

fn find<T>(receivers: &[Arc<Subscription<T>>], name: &str) -> std::result::Result<usize, usize> {
    receivers.binary_search_by(|sub| sub.queue.name().cmp(name))
}

fn same_queue<T>(a: &QueueHandle<T>, b: &QueueHandle<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

// -----------------------------------------------------------------------------
//              - Shared state -
// -----------------------------------------------------------------------------
struct Shared<T> {
    constructor: QueueConstructor<T>,
    ingress: QueueHandle<T>,
    // Sorted by name, names are unique
    receivers: RwLock<Vec<Arc<Subscription<T>>>>,
    cancel: Signal,
    pool: WorkerPool,
    delivery_timeout: Duration,
}

impl<T: Clone + Send + 'static> Shared<T> {
    fn dispatch(self: Arc<Self>) {
        debug!("dispatch loop started");
        while !self.cancel.is_fired() {
            let value = match self.ingress.receive_timeout(CANCEL_POLL) {
                Ok(value) => value,
                Err(Error::Timeout(_)) => continue,
                Err(e) => {
                    debug!("ingress stopped: {}", e);
                    break;
                }
            };

            if let Err(e) = self.fan_out(value) {
                debug!("fan out stopped: {}", e);
                break;
            }
        }
        debug!("dispatch loop stopped");
    }

    fn fan_out(self: &Arc<Self>, value: T) -> Result<()> {
        // Copies go to the couriers under the read lock. The watch tasks are
        // submitted after it is released, as a watch that times out needs
        // the write lock to evict.
        let deadline = Instant::now() + self.delivery_timeout;
        let watches = {
            let receivers = self.receivers.read();
            receivers
                .iter()
                .filter_map(|sub| sub.enqueue(value.clone()).map(|seq| (Arc::clone(sub), seq)))
                .collect::<Vec<_>>()
        };

        trace!("fan out to {} receivers", watches.len());
        for (sub, seq) in watches {
            let shared = Arc::clone(self);
            self.pool.go(move || shared.watch(&sub, seq, deadline))?;
        }
        Ok(())
    }

    fn watch(&self, sub: &Arc<Subscription<T>>, seq: u64, deadline: Instant) {
        if sub.await_delivery(seq, deadline) {
            return;
        }

        warn!(
            "receiver `{}` did not accept a value within {:?}, evicting",
            sub.name(),
            self.delivery_timeout
        );
        self.evict(sub);
    }

    fn evict(&self, sub: &Arc<Subscription<T>>) {
        let mut receivers = self.receivers.write();
        if let Ok(index) = find(&receivers, sub.name()) {
            if Arc::ptr_eq(&receivers[index], sub) {
                receivers.remove(index).shut();
            }
        }
    }

    // Remove the receiver called `name`. If `handle` is given the registered
    // queue also has to be that exact queue.
    fn remove(&self, name: &str, handle: Option<&QueueHandle<T>>) -> bool {
        let mut receivers = self.receivers.write();
        let index = match find(&receivers, name) {
            Ok(index) => index,
            Err(_) => return false,
        };

        if let Some(handle) = handle {
            if !same_queue(&receivers[index].queue, handle) {
                return false;
            }
        }

        receivers.remove(index).shut();
        debug!("receiver `{}` removed", name);
        true
    }
}

// -----------------------------------------------------------------------------
//              - Broadcaster -
// -----------------------------------------------------------------------------
/// Copy every value sent to the broadcaster to all registered receivers.
///
/// Values reach each receiver in the order they were sent. There is no
/// ordering between different receivers. A receiver added or removed while a
/// value is being fanned out may or may not get that value.
///
/// ```
/// use std::time::Duration;
/// use hydro::sync::{Broadcaster, Capacity, Channel, Queue};
///
/// let broadcaster = Broadcaster::new(Channel::constructor(Capacity::Bounded(16)), 4).unwrap();
/// let first = broadcaster.add_receiver("first").unwrap();
/// let second = broadcaster.add_receiver("second").unwrap();
/// broadcaster.start_broadcast().unwrap();
///
/// broadcaster.send("hello".to_string()).unwrap();
///
/// let timeout = Duration::from_secs(5);
/// assert_eq!(first.receive_timeout(timeout).unwrap(), "hello");
/// assert_eq!(second.receive_timeout(timeout).unwrap(), "hello");
///
/// broadcaster.close();
/// assert!(broadcaster.send("bye".to_string()).is_err());
/// ```
pub struct Broadcaster<T: Clone + Send + 'static> {
    shared: Arc<Shared<T>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    /// Create a broadcaster delivering through `workers` workers with the
    /// default delivery timeout.
    ///
    /// The ingress queue is created right away by calling
    /// `constructor("main")`.
    pub fn new<F>(constructor: F, workers: usize) -> Result<Self>
    where
        F: Fn(&str) -> Box<dyn Queue<T>> + Send + Sync + 'static,
    {
        Self::with_config(constructor, BroadcastConfig::default().with_workers(workers))
    }

    /// Create a broadcaster from a [`BroadcastConfig`]
    ///
    /// [`BroadcastConfig`]: struct.BroadcastConfig.html
    pub fn with_config<F>(constructor: F, config: BroadcastConfig) -> Result<Self>
    where
        F: Fn(&str) -> Box<dyn Queue<T>> + Send + Sync + 'static,
    {
        let pool = WorkerPool::new(config.workers)?;
        let ingress: QueueHandle<T> = Arc::from(constructor(INGRESS_NAME));

        let shared = Shared {
            constructor: Box::new(constructor),
            ingress,
            receivers: RwLock::new(Vec::new()),
            cancel: Signal::new(),
            pool,
            delivery_timeout: config.delivery_timeout,
        };

        Ok(Self {
            shared: Arc::new(shared),
            dispatcher: Mutex::new(None),
        })
    }

    /// Push a value onto the ingress queue.
    ///
    /// Errors from the ingress come back wrapped in `Error::Ingress`; once
    /// the broadcaster is closed that is a wrapped `Error::Closed`, for which
    /// `is_closed` holds.
    pub fn send(&self, value: T) -> Result<()> {
        self.shared
            .ingress
            .send(value)
            .map_err(|e| Error::Ingress(Box::new(e)))
    }

    /// Start the dispatch thread.
    ///
    /// The thread runs until the broadcaster is closed. Calling this again
    /// while it is running does nothing.
    pub fn start_broadcast(&self) -> Result<()> {
        let mut dispatcher = self.dispatcher.lock();
        if self.is_closed() {
            return Err(Error::Closed(INGRESS_NAME.into()));
        }
        if dispatcher.is_some() {
            warn!("dispatch loop is already running");
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("hydro-dispatch".into())
            .spawn(move || shared.dispatch())
            .map_err(|e| Error::Spawn(e.to_string()))?;

        *dispatcher = Some(handle);
        Ok(())
    }

    /// Register a new receiver called `name`.
    ///
    /// Fails with `Error::DuplicateReceiver` if the name is taken, in which
    /// case the registry is left as it was.
    pub fn add_receiver(&self, name: &str) -> Result<QueueHandle<T>> {
        let mut receivers = self.shared.receivers.write();
        if self.is_closed() {
            return Err(Error::Closed(INGRESS_NAME.into()));
        }

        let queue: QueueHandle<T> = Arc::from((self.shared.constructor)(name));

        match find(&receivers, queue.name()) {
            Ok(_) => {
                queue.close();
                debug!("receiver `{}` already exists", name);
                Err(Error::DuplicateReceiver(name.into()))
            }
            Err(index) => {
                let sub = match Subscription::start(queue.clone()) {
                    Ok(sub) => sub,
                    Err(e) => {
                        queue.close();
                        return Err(e);
                    }
                };
                receivers.insert(index, sub);
                debug!("receiver `{}` added", name);
                Ok(queue)
            }
        }
    }

    /// Remove and close a receiver.
    /// Returns `false` if this exact receiver is not registered.
    pub fn remove_receiver(&self, receiver: &QueueHandle<T>) -> bool {
        self.shared.remove(receiver.name(), Some(receiver))
    }

    /// Remove and close the receiver called `name`.
    /// Returns `false` if there is no such receiver.
    pub fn remove_receiver_by_name(&self, name: &str) -> bool {
        self.shared.remove(name, None)
    }

    /// Names of the registered receivers, in ascending order
    pub fn receiver_names(&self) -> Vec<String> {
        self.shared
            .receivers
            .read()
            .iter()
            .map(|sub| sub.name().to_string())
            .collect()
    }

    /// Number of registered receivers
    pub fn receiver_count(&self) -> usize {
        self.shared.receivers.read().len()
    }

    /// `true` once `close` has been called
    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_fired()
    }

    /// Close the ingress queue and every receiver, and stop the dispatch
    /// thread. Calling this more than once has no further effect.
    pub fn close(&self) {
        {
            let mut receivers = self.shared.receivers.write();
            if !self.shared.cancel.fire() {
                return;
            }

            self.shared.ingress.close();
            for sub in receivers.drain(..) {
                sub.shut();
            }
        }

        self.shared.pool.close();

        let dispatcher = self.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            if handle.join().is_err() {
                error!("dispatch thread panicked");
            }
        }
        debug!("broadcaster closed");
    }
}

impl<T: Clone + Send + 'static> Drop for Broadcaster<T> {
    fn drop(&mut self) {
        self.close();
    }
}
