use std::thread;
use std::time::Instant;

use hydro::errors::Result;
use hydro::sync::{Broadcaster, RingBuffer};

const MAX: i64 = 100_000;
const RECEIVERS: usize = 128;

fn main() -> Result<()> {
    let bc = Broadcaster::new(RingBuffer::constructor(4096), 1024)?;
    bc.start_broadcast()?;

    let mut handles = Vec::with_capacity(RECEIVERS);
    for i in 0..RECEIVERS {
        let receiver = bc.add_receiver(&i.to_string())?;
        handles.push(thread::spawn(move || loop {
            match receiver.receive() {
                Ok(MAX) => break,
                Ok(_) => {}
                Err(e) => {
                    eprintln!("{}", e);
                    break;
                }
            }
        }));
    }

    let start = Instant::now();

    for i in 1..=MAX {
        if let Err(e) = bc.send(i) {
            eprintln!("{}", e);
        }
    }

    for handle in handles {
        let _ = handle.join();
    }

    println!("{:?}", start.elapsed());
    Ok(())
}
