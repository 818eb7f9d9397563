//! One-shot cancellation signal
use std::fmt::{self, Debug};

use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;

// -----------------------------------------------------------------------------
//              - Signal -
// -----------------------------------------------------------------------------
/// A signal that can be fired exactly once.
///
/// Firing drops the sending half of an internal channel, so every thread
/// watching the signal observes the disconnect, no matter how many there are.
///
/// ```
/// use hydro::sync::signal::Signal;
///
/// let signal = Signal::new();
/// assert!(!signal.is_fired());
/// assert!(signal.fire());
/// assert!(!signal.fire());
/// assert!(signal.is_fired());
/// ```
pub struct Signal {
    trigger: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl Signal {
    /// Create a signal that has not fired yet
    pub fn new() -> Self {
        let (trigger, receiver) = bounded(0);
        Self {
            trigger: Mutex::new(Some(trigger)),
            receiver,
        }
    }

    /// Fire the signal.
    /// Returns `false` if it had already been fired.
    pub fn fire(&self) -> bool {
        self.trigger.lock().take().is_some()
    }

    /// `true` once the signal has been fired
    pub fn is_fired(&self) -> bool {
        match self.receiver.try_recv() {
            Err(TryRecvError::Disconnected) => true,
            _ => false,
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Signal {{ fired: {} }}", self.is_fired())
    }
}
