//! Buffered channel queue
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;

use crate::errors::{Error, Result};

use super::queue::{Queue, QueueConstructor};
use super::Capacity;

/// Time given to in-flight sends to observe the closed flag
/// before the channel is torn down.
pub const CLOSE_GRACE: Duration = Duration::from_millis(1);

// -----------------------------------------------------------------------------
// 		- Channel -
// -----------------------------------------------------------------------------
/// A queue backed by a crossbeam channel.
///
/// A bounded channel blocks senders while it is full. Setting the capacity to
/// zero means no value is held in the channel and `send` blocks until the
/// value is picked up at the other end.
///
/// Closing first marks the channel as closed, waits [`CLOSE_GRACE`] and then
/// wakes up every blocked sender and receiver.
///
/// ```
/// use hydro::sync::{Capacity, Channel, Queue};
///
/// let channel = Channel::new("greetings", Capacity::Bounded(4));
/// channel.send("hello").unwrap();
/// assert_eq!(channel.receive().unwrap(), "hello");
/// ```
///
/// [`CLOSE_GRACE`]: constant.CLOSE_GRACE.html
pub struct Channel<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    // Disconnects once the trigger is dropped
    done: Receiver<()>,
    done_trigger: Mutex<Option<Sender<()>>>,
    closed: AtomicBool,
    name: String,
}

impl<T: Send + 'static> Channel<T> {
    /// Create a new channel
    pub fn new(name: impl Into<String>, capacity: Capacity) -> Self {
        let (sender, receiver) = match capacity {
            Capacity::Unbounded => unbounded(),
            Capacity::Bounded(cap) => bounded(cap),
        };
        let (done_trigger, done) = bounded(0);

        Self {
            sender,
            receiver,
            done,
            done_trigger: Mutex::new(Some(done_trigger)),
            closed: AtomicBool::new(false),
            name: name.into(),
        }
    }

    /// A [`QueueConstructor`] creating channels of the given capacity.
    ///
    /// [`QueueConstructor`]: ../queue/type.QueueConstructor.html
    pub fn constructor(capacity: Capacity) -> QueueConstructor<T> {
        Box::new(move |name: &str| -> Box<dyn Queue<T>> {
            Box::new(Channel::new(name, capacity))
        })
    }

    /// Number of values waiting in the channel
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// `true` if no values are waiting
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    fn closed_error(&self) -> Error {
        Error::Closed(self.name.clone())
    }

    // Only reached once `done` fired: hand out what is left, then report closed.
    fn drain(&self) -> Result<T> {
        self.receiver.try_recv().map_err(|_| self.closed_error())
    }
}

impl<T: Send + 'static> Queue<T> for Channel<T> {
    fn send(&self, value: T) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        select! {
            send(self.sender, value) -> res => res.map_err(|_| self.closed_error()),
            recv(self.done) -> _ => Err(self.closed_error()),
        }
    }

    fn send_timeout(&self, value: T, timeout: Duration) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        select! {
            send(self.sender, value) -> res => res.map_err(|_| self.closed_error()),
            recv(self.done) -> _ => Err(self.closed_error()),
            default(timeout) => Err(Error::Timeout(self.name.clone())),
        }
    }

    fn receive(&self) -> Result<T> {
        select! {
            recv(self.receiver) -> value => value.map_err(|_| self.closed_error()),
            recv(self.done) -> _ => self.drain(),
        }
    }

    fn receive_timeout(&self, timeout: Duration) -> Result<T> {
        select! {
            recv(self.receiver) -> value => value.map_err(|_| self.closed_error()),
            recv(self.done) -> _ => self.drain(),
            default(timeout) => Err(Error::Timeout(self.name.clone())),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        thread::sleep(CLOSE_GRACE);
        self.done_trigger.lock().take();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
