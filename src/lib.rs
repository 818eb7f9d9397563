#![deny(missing_docs)]
//! # Hydro
//!
//! In-process fan-out: one producer sends values to a [`Broadcaster`], which
//! copies each value to every registered receiver queue.
//!
//! Receivers are plain queues implementing the [`Queue`] trait, created by a
//! constructor handed to the broadcaster, so the same broadcaster works with a
//! lock-free [`RingBuffer`] or a crossbeam backed [`Channel`].
//! Deliveries run on a bounded [`WorkerPool`], and a receiver that stops
//! accepting values is evicted rather than holding up everyone else.
//!
//! ```
//! use std::time::Duration;
//! use hydro::sync::{Broadcaster, Queue, RingBuffer};
//!
//! let broadcaster = Broadcaster::new(RingBuffer::constructor(64), 8).unwrap();
//! let receiver = broadcaster.add_receiver("logger").unwrap();
//! broadcaster.start_broadcast().unwrap();
//!
//! for i in 0..10u32 {
//!     broadcaster.send(i).unwrap();
//! }
//!
//! for i in 0..10u32 {
//!     assert_eq!(receiver.receive_timeout(Duration::from_secs(5)).unwrap(), i);
//! }
//! ```
//!
//! [`Broadcaster`]: sync/broadcast/struct.Broadcaster.html
//! [`Queue`]: sync/queue/trait.Queue.html
//! [`RingBuffer`]: sync/ring/struct.RingBuffer.html
//! [`Channel`]: sync/channel/struct.Channel.html
//! [`WorkerPool`]: pool/struct.WorkerPool.html
#[macro_use] extern crate log;

pub mod errors;
pub mod pool;
pub mod sync;

// Pub uses
pub use errors::{Error, Result};
