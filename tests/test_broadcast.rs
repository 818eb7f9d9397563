use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::unbounded;

use hydro::errors::{Error, Result};
use hydro::sync::{BroadcastConfig, Broadcaster, Capacity, Channel, Queue, QueueConstructor, RingBuffer};

const TIMEOUT: Duration = Duration::from_secs(5);

fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn constructors<T: Send + 'static>() -> Vec<QueueConstructor<T>> {
    vec![
        RingBuffer::constructor(16),
        Channel::constructor(Capacity::Bounded(16)),
    ]
}

// -----------------------------------------------------------------------------
// 		- A receiver that panics on every delivery -
// -----------------------------------------------------------------------------
struct Faulty {
    name: String,
    closed: AtomicBool,
}

impl Queue<u32> for Faulty {
    fn send(&self, _: u32) -> Result<()> {
        panic!("{} refuses values", self.name)
    }

    fn send_timeout(&self, value: u32, _: Duration) -> Result<()> {
        self.send(value)
    }

    fn receive(&self) -> Result<u32> {
        Err(Error::Closed(self.name.clone()))
    }

    fn receive_timeout(&self, _: Duration) -> Result<u32> {
        self.receive()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// -----------------------------------------------------------------------------
// 		- A receiver whose send blocks for seconds, whatever the timeout -
// -----------------------------------------------------------------------------
struct Hanging {
    name: String,
    closed: AtomicBool,
}

impl Queue<u32> for Hanging {
    fn send(&self, _: u32) -> Result<()> {
        thread::sleep(Duration::from_secs(3));
        Ok(())
    }

    fn send_timeout(&self, value: u32, _: Duration) -> Result<()> {
        self.send(value)
    }

    fn receive(&self) -> Result<u32> {
        Err(Error::Closed(self.name.clone()))
    }

    fn receive_timeout(&self, _: Duration) -> Result<u32> {
        self.receive()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// -----------------------------------------------------------------------------
// 		- An ingress that never wakes a blocked receive, not even on close -
// -----------------------------------------------------------------------------
struct Deaf {
    name: String,
    closed: AtomicBool,
}

impl Queue<u32> for Deaf {
    fn send(&self, _: u32) -> Result<()> {
        Ok(())
    }

    fn send_timeout(&self, value: u32, _: Duration) -> Result<()> {
        self.send(value)
    }

    fn receive(&self) -> Result<u32> {
        loop {
            thread::park();
        }
    }

    fn receive_timeout(&self, timeout: Duration) -> Result<u32> {
        thread::sleep(timeout);
        Err(Error::Timeout(self.name.clone()))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[test]
fn test_registry_stays_sorted() {
    let bc = Broadcaster::<u32>::new(RingBuffer::constructor(4), 2).unwrap();
    for name in &["delta", "alpha", "echo", "charlie", "bravo"] {
        bc.add_receiver(name).unwrap();
    }
    assert!(bc.remove_receiver_by_name("charlie"));
    assert!(!bc.remove_receiver_by_name("charlie"));
    bc.add_receiver("aardvark").unwrap();
    bc.add_receiver("zulu").unwrap();
    assert!(bc.add_receiver("echo").is_err());

    let names = bc.receiver_names();
    assert_eq!(names, vec!["aardvark", "alpha", "bravo", "delta", "echo", "zulu"]);
    assert_eq!(bc.receiver_count(), 6);
}

#[test]
fn test_duplicate_receiver_rejected() {
    let bc = Broadcaster::<u32>::new(RingBuffer::constructor(4), 2).unwrap();
    let first = bc.add_receiver("A").unwrap();

    match bc.add_receiver("A") {
        Err(Error::DuplicateReceiver(name)) => assert_eq!(name, "A"),
        other => panic!("expected a duplicate error, got {:?}", other.map(|q| q.name().to_string())),
    }

    assert_eq!(bc.receiver_names(), vec!["A"]);
    assert!(!first.is_closed());
}

#[test]
fn test_fan_out() {
    // -----------------------------------------------------------------------------
    // 		- Every receiver gets its own copy -
    // -----------------------------------------------------------------------------
    for constructor in constructors::<String>() {
        let bc = Broadcaster::new(constructor, 4).unwrap();
        let receivers = ["A", "B", "C"]
            .iter()
            .map(|name| bc.add_receiver(name).unwrap())
            .collect::<Vec<_>>();
        bc.start_broadcast().unwrap();

        bc.send("Hello, World!".to_string()).unwrap();

        for receiver in &receivers {
            assert_eq!(receiver.receive_timeout(TIMEOUT).unwrap(), "Hello, World!");
        }
    }
}

#[test]
fn test_per_receiver_order() {
    // -----------------------------------------------------------------------------
    // 		- Three consumers, eight workers, a hundred values -
    // 		Each consumer sees every value in the order it was sent
    // -----------------------------------------------------------------------------
    const COUNT: u32 = 100;

    for constructor in constructors::<u32>() {
        let bc = Broadcaster::new(constructor, 8).unwrap();

        let consumers = ["one", "two", "three"]
            .iter()
            .map(|name| {
                let receiver = bc.add_receiver(name).unwrap();
                thread::spawn(move || {
                    (0..COUNT)
                        .map(|_| receiver.receive_timeout(TIMEOUT))
                        .collect::<Result<Vec<u32>>>()
                })
            })
            .collect::<Vec<_>>();

        bc.start_broadcast().unwrap();
        for i in 0..COUNT {
            bc.send(i).unwrap();
        }

        let expected = (0..COUNT).collect::<Vec<_>>();
        for consumer in consumers {
            assert_eq!(consumer.join().unwrap().unwrap(), expected);
        }
    }
}

#[test]
fn test_unresponsive_receiver_is_evicted() {
    // -----------------------------------------------------------------------------
    // 		- A receiver nobody reads from -
    // 		Its single slot fills up, the next delivery times out and
    // 		the receiver is removed and closed
    // -----------------------------------------------------------------------------
    let config = BroadcastConfig::default()
        .with_workers(4)
        .with_delivery_timeout(Duration::from_millis(100));
    let bc = Broadcaster::with_config(RingBuffer::constructor(1), config).unwrap();

    let fast = bc.add_receiver("fast").unwrap();
    let stuck = bc.add_receiver("stuck").unwrap();
    bc.start_broadcast().unwrap();

    bc.send(1u32).unwrap();
    assert_eq!(fast.receive_timeout(TIMEOUT).unwrap(), 1);
    bc.send(2).unwrap();
    assert_eq!(fast.receive_timeout(TIMEOUT).unwrap(), 2);

    assert!(wait_until(|| bc.receiver_names() == vec!["fast"]));
    assert!(stuck.is_closed());

    // What made it in before the eviction is still readable
    assert_eq!(stuck.receive_timeout(TIMEOUT).unwrap(), 1);
    assert!(stuck.receive_timeout(TIMEOUT).unwrap_err().is_closed());

    bc.send(3).unwrap();
    assert_eq!(fast.receive_timeout(TIMEOUT).unwrap(), 3);
    assert!(!fast.is_closed());
}

#[test]
fn test_slow_receiver_does_not_hold_up_others() {
    // -----------------------------------------------------------------------------
    // 		- A live receiver reading slower than values arrive -
    // 		The fast receiver keeps getting values while the slow one
    // 		falls behind, and the slow one is evicted once a value has
    // 		waited longer than the delivery timeout
    // -----------------------------------------------------------------------------
    const COUNT: u32 = 30;

    let config = BroadcastConfig::default()
        .with_workers(4)
        .with_delivery_timeout(Duration::from_millis(150));
    let bc = Broadcaster::with_config(RingBuffer::constructor(1), config).unwrap();

    let fast = bc.add_receiver("fast").unwrap();
    let slow = bc.add_receiver("slow").unwrap();

    let slow_reader = thread::spawn(move || {
        let mut seen = 0;
        loop {
            thread::sleep(Duration::from_millis(100));
            match slow.receive_timeout(TIMEOUT) {
                Ok(_) => seen += 1,
                Err(_) => break seen,
            }
        }
    });

    let fast_reader = thread::spawn(move || {
        let start = Instant::now();
        let values = (0..COUNT)
            .map(|_| fast.receive_timeout(TIMEOUT))
            .collect::<Result<Vec<u32>>>();
        (values, start.elapsed())
    });

    bc.start_broadcast().unwrap();
    for i in 0..COUNT {
        bc.send(i).unwrap();
    }

    let (values, elapsed) = fast_reader.join().unwrap();
    assert_eq!(values.unwrap(), (0..COUNT).collect::<Vec<_>>());
    assert!(elapsed < Duration::from_millis(1200), "fast receiver took {:?}", elapsed);

    assert!(wait_until(|| bc.receiver_names() == vec!["fast"]));
    assert!(slow_reader.join().unwrap() < COUNT as usize);
}

#[test]
fn test_hanging_receiver_is_evicted() {
    // -----------------------------------------------------------------------------
    // 		- A receiver whose send ignores its timeout -
    // 		It is evicted after the delivery timeout all the same, and
    // 		the healthy receiver gets every value without waiting on it
    // -----------------------------------------------------------------------------
    let constructor = |name: &str| -> Box<dyn Queue<u32>> {
        if name.starts_with("hang") {
            Box::new(Hanging {
                name: name.to_string(),
                closed: AtomicBool::new(false),
            })
        } else {
            Box::new(RingBuffer::new(name, 16))
        }
    };
    let config = BroadcastConfig::default()
        .with_workers(2)
        .with_delivery_timeout(Duration::from_millis(100));
    let bc = Broadcaster::with_config(constructor, config).unwrap();

    let hang = bc.add_receiver("hang").unwrap();
    let ok = bc.add_receiver("ok").unwrap();
    bc.start_broadcast().unwrap();

    let start = Instant::now();
    for i in 0..4 {
        bc.send(i).unwrap();
    }
    for i in 0..4 {
        assert_eq!(ok.receive_timeout(TIMEOUT).unwrap(), i);
    }
    assert!(start.elapsed() < Duration::from_secs(2), "took {:?}", start.elapsed());

    assert!(wait_until(|| bc.receiver_names() == vec!["ok"]));
    assert!(hang.is_closed());
    assert!(!ok.is_closed());
}

#[test]
fn test_close_stops_dispatch_on_deaf_ingress() {
    // -----------------------------------------------------------------------------
    // 		- Close returns even if the ingress never wakes the
    // 		dispatch thread -
    // -----------------------------------------------------------------------------
    let constructor = |name: &str| -> Box<dyn Queue<u32>> {
        if name == "main" {
            Box::new(Deaf {
                name: name.to_string(),
                closed: AtomicBool::new(false),
            })
        } else {
            Box::new(RingBuffer::new(name, 16))
        }
    };
    let bc = Broadcaster::new(constructor, 2).unwrap();
    bc.add_receiver("A").unwrap();
    bc.start_broadcast().unwrap();
    thread::sleep(Duration::from_millis(50));

    let (done_tx, done_rx) = unbounded();
    thread::spawn(move || {
        bc.close();
        let _ = done_tx.send(());
    });

    assert!(done_rx.recv_timeout(TIMEOUT).is_ok());
}

#[test]
fn test_remove_receivers() {
    let bc = Broadcaster::new(Channel::constructor(Capacity::Bounded(4)), 2).unwrap();
    let a = bc.add_receiver("A").unwrap();
    let b = bc.add_receiver("B").unwrap();
    let c = bc.add_receiver("C").unwrap();
    bc.start_broadcast().unwrap();

    assert!(bc.remove_receiver(&b));
    assert!(bc.remove_receiver_by_name("C"));
    assert!(!bc.remove_receiver(&b));
    assert_eq!(bc.receiver_names(), vec!["A"]);
    assert!(b.is_closed());
    assert!(c.is_closed());

    bc.send(7u32).unwrap();
    assert_eq!(a.receive_timeout(TIMEOUT).unwrap(), 7);
    assert!(b.receive_timeout(TIMEOUT).unwrap_err().is_closed());
    assert!(c.receive_timeout(TIMEOUT).unwrap_err().is_closed());
}

#[test]
fn test_stale_handle_keeps_new_receiver() {
    let bc = Broadcaster::<u32>::new(RingBuffer::constructor(4), 2).unwrap();
    let old = bc.add_receiver("A").unwrap();
    assert!(bc.remove_receiver(&old));

    let new = bc.add_receiver("A").unwrap();
    assert!(!bc.remove_receiver(&old));
    assert_eq!(bc.receiver_names(), vec!["A"]);
    assert!(!new.is_closed());
}

#[test]
fn test_close() {
    for constructor in constructors::<u32>() {
        let bc = Broadcaster::new(constructor, 4).unwrap();
        let a = bc.add_receiver("A").unwrap();
        let b = bc.add_receiver("B").unwrap();
        bc.start_broadcast().unwrap();

        bc.send(1).unwrap();
        assert_eq!(a.receive_timeout(TIMEOUT).unwrap(), 1);

        bc.close();
        bc.close();

        assert!(bc.is_closed());
        match bc.send(2) {
            Err(Error::Ingress(inner)) => assert_eq!(*inner, Error::Closed("main".into())),
            other => panic!("expected a wrapped ingress error, got {:?}", other),
        }
        assert!(bc.send(2).unwrap_err().is_closed());
        assert_eq!(bc.receiver_count(), 0);
        assert!(bc.add_receiver("C").err().unwrap().is_closed());
        assert!(bc.start_broadcast().unwrap_err().is_closed());

        assert!(a.receive_timeout(TIMEOUT).unwrap_err().is_closed());
        // `B` may or may not have been handed the value before the close
        loop {
            match b.receive_timeout(TIMEOUT) {
                Ok(value) => assert_eq!(value, 1),
                Err(e) => {
                    assert!(e.is_closed());
                    break;
                }
            }
        }
    }
}

#[test]
fn test_drop_closes_receivers() {
    let receiver = {
        let bc = Broadcaster::<u32>::new(RingBuffer::constructor(4), 2).unwrap();
        bc.start_broadcast().unwrap();
        bc.add_receiver("A").unwrap()
    };
    assert!(receiver.is_closed());
}

#[test]
fn test_faulty_receiver_is_not_evicted() {
    // -----------------------------------------------------------------------------
    // 		- A panicking receiver is logged, not evicted -
    // 		and the healthy receiver is not affected
    // -----------------------------------------------------------------------------
    let constructor = |name: &str| -> Box<dyn Queue<u32>> {
        if name.starts_with("faulty") {
            Box::new(Faulty {
                name: name.to_string(),
                closed: AtomicBool::new(false),
            })
        } else {
            Box::new(RingBuffer::new(name, 16))
        }
    };
    let bc = Broadcaster::new(constructor, 2).unwrap();
    let faulty = bc.add_receiver("faulty").unwrap();
    let healthy = bc.add_receiver("healthy").unwrap();
    bc.start_broadcast().unwrap();

    bc.send(1).unwrap();
    bc.send(2).unwrap();
    assert_eq!(healthy.receive_timeout(TIMEOUT).unwrap(), 1);
    assert_eq!(healthy.receive_timeout(TIMEOUT).unwrap(), 2);

    assert_eq!(bc.receiver_names(), vec!["faulty", "healthy"]);
    assert!(!faulty.is_closed());
}
