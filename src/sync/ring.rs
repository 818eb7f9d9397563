//! Bounded lock-free ring buffer queue
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::queue::ArrayQueue;
use crossbeam::utils::Backoff;

use crate::errors::{Error, Result};

use super::queue::{Queue, QueueConstructor};

// How long a blocked sender / receiver sleeps between polls once
// spinning and yielding did not help.
const IDLE_SLEEP: Duration = Duration::from_micros(50);

// -----------------------------------------------------------------------------
// 		- Ring buffer -
// -----------------------------------------------------------------------------
/// A fixed capacity queue on top of crossbeam's lock-free [`ArrayQueue`].
///
/// `send` blocks while the buffer is full and `receive` blocks while it is
/// empty. Blocking is done by spinning, then yielding, then sleeping in
/// short intervals, so neither side ever takes a lock.
///
/// ```
/// use hydro::sync::{Queue, RingBuffer};
///
/// let ring = RingBuffer::new("numbers", 2);
/// ring.send(1).unwrap();
/// ring.send(2).unwrap();
/// ring.close();
///
/// assert!(ring.send(3).is_err());
/// assert_eq!(ring.receive().unwrap(), 1);
/// assert_eq!(ring.receive().unwrap(), 2);
/// assert!(ring.receive().unwrap_err().is_closed());
/// ```
///
/// [`ArrayQueue`]: https://docs.rs/crossbeam/latest/crossbeam/queue/struct.ArrayQueue.html
pub struct RingBuffer<T> {
    buffer: ArrayQueue<T>,
    closed: AtomicBool,
    name: String,
}

impl<T: Send + 'static> RingBuffer<T> {
    /// Create a ring buffer holding at most `capacity` values.
    /// A capacity of zero is bumped to one.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            buffer: ArrayQueue::new(capacity.max(1)),
            closed: AtomicBool::new(false),
            name: name.into(),
        }
    }

    /// A [`QueueConstructor`] creating ring buffers of the given capacity.
    ///
    /// [`QueueConstructor`]: ../queue/type.QueueConstructor.html
    pub fn constructor(capacity: usize) -> QueueConstructor<T> {
        Box::new(move |name: &str| -> Box<dyn Queue<T>> {
            Box::new(RingBuffer::new(name, capacity))
        })
    }

    /// Maximum number of values the buffer can hold
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Number of values currently held
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// `true` if no values are held
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn push(&self, mut value: T, deadline: Option<Instant>) -> Result<()> {
        let backoff = Backoff::new();
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(Error::Closed(self.name.clone()));
            }

            match self.buffer.push(value) {
                Ok(()) => return Ok(()),
                Err(rejected) => value = rejected,
            }

            if expired(deadline) {
                return Err(Error::Timeout(self.name.clone()));
            }
            idle(&backoff);
        }
    }

    fn pop(&self, deadline: Option<Instant>) -> Result<T> {
        let backoff = Backoff::new();
        loop {
            if let Some(value) = self.buffer.pop() {
                return Ok(value);
            }

            if self.closed.load(Ordering::Acquire) {
                // A send may have landed between the pop and the close check.
                return self
                    .buffer
                    .pop()
                    .ok_or_else(|| Error::Closed(self.name.clone()));
            }

            if expired(deadline) {
                return Err(Error::Timeout(self.name.clone()));
            }
            idle(&backoff);
        }
    }
}

impl<T: Send + 'static> Queue<T> for RingBuffer<T> {
    fn send(&self, value: T) -> Result<()> {
        self.push(value, None)
    }

    fn send_timeout(&self, value: T, timeout: Duration) -> Result<()> {
        self.push(value, Some(Instant::now() + timeout))
    }

    fn receive(&self) -> Result<T> {
        self.pop(None)
    }

    fn receive_timeout(&self, timeout: Duration) -> Result<T> {
        self.pop(Some(Instant::now() + timeout))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.map_or(false, |deadline| Instant::now() >= deadline)
}

fn idle(backoff: &Backoff) {
    if backoff.is_completed() {
        thread::sleep(IDLE_SLEEP);
    } else {
        backoff.snooze();
    }
}
