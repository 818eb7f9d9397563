//! Queues, the one-shot signal and the broadcaster built on top of them.
pub mod broadcast;
pub mod channel;
pub mod queue;
pub mod ring;
pub mod signal;

pub use broadcast::{BroadcastConfig, Broadcaster};
pub use channel::Channel;
pub use queue::{Queue, QueueConstructor, QueueHandle};
pub use ring::RingBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Queue capacity
pub enum Capacity {
    /// Unlimited number of messages
    Unbounded,
    /// Limited number of messages
    Bounded(usize),
}
