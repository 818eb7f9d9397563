//! The queue contract shared by the ingress queue and every receiver.
use std::sync::Arc;
use std::time::Duration;

use crate::errors::Result;

// -----------------------------------------------------------------------------
// 		- Queue -
// -----------------------------------------------------------------------------
/// A named, closable FIFO queue.
///
/// The [`Broadcaster`] only ever talks to its queues through this trait,
/// which makes it possible to back the ingress queue and the receivers with
/// any implementation, e.g a [`RingBuffer`] or a [`Channel`].
///
/// Once a queue is closed `send` fails with `Error::Closed`.
/// `receive` keeps handing out values still held by the queue and fails
/// with `Error::Closed` once it is drained.
///
/// [`Broadcaster`]: ../broadcast/struct.Broadcaster.html
/// [`RingBuffer`]: ../ring/struct.RingBuffer.html
/// [`Channel`]: ../channel/struct.Channel.html
pub trait Queue<T>: Send + Sync {
    /// Push a value onto the queue, blocking while the queue is full.
    fn send(&self, value: T) -> Result<()>;

    /// Push a value onto the queue, giving up with `Error::Timeout`
    /// if there is still no room once `timeout` has passed.
    /// The value is dropped on failure.
    fn send_timeout(&self, value: T, timeout: Duration) -> Result<()>;

    /// Pop the next value, blocking while the queue is empty and open.
    fn receive(&self) -> Result<T>;

    /// Pop the next value, giving up with `Error::Timeout` if nothing
    /// arrived within `timeout`.
    fn receive_timeout(&self, timeout: Duration) -> Result<T>;

    /// Close the queue. Calling this more than once has no further effect.
    fn close(&self);

    /// `true` once `close` has been called
    fn is_closed(&self) -> bool;

    /// The name the queue was created with
    fn name(&self) -> &str;
}

/// A shared handle to a queue.
/// This is what a consumer receives from `Broadcaster::add_receiver`.
pub type QueueHandle<T> = Arc<dyn Queue<T>>;

/// Creates a queue given its name.
///
/// Called once with `"main"` for the ingress queue and once per
/// `add_receiver`, possibly from several threads at the same time.
pub type QueueConstructor<T> = Box<dyn Fn(&str) -> Box<dyn Queue<T>> + Send + Sync>;
