//! `BackpressureStrategy` — how `stage()` behaves when too many requests
//! are already in flight. Ported from `original_source/include/qclient/Options.hh`.

use std::sync::{Condvar, Mutex};

#[derive(Debug, Clone, Copy)]
pub enum BackpressureStrategy {
    /// No limit: `stage()` never blocks on queue depth.
    Infinite,
    /// Block the caller once `limit` requests are outstanding.
    LimitSize(usize),
}

impl Default for BackpressureStrategy {
    fn default() -> Self {
        BackpressureStrategy::Infinite
    }
}

/// The gate a caller blocks on before staging a new request, when the
/// configured strategy is `LimitSize`.
pub struct Backpressure {
    strategy: BackpressureStrategy,
    state: Mutex<usize>,
    room: Condvar,
}

impl Backpressure {
    pub fn new(strategy: BackpressureStrategy) -> Self {
        Backpressure {
            strategy,
            state: Mutex::new(0),
            room: Condvar::new(),
        }
    }

    /// Block until there's room for one more outstanding request, then
    /// reserve the slot.
    pub fn acquire(&self) {
        let limit = match self.strategy {
            BackpressureStrategy::Infinite => {
                *self.state.lock().unwrap() += 1;
                return;
            }
            BackpressureStrategy::LimitSize(n) => n,
        };

        let mut count = self.state.lock().unwrap();
        while *count >= limit {
            count = self.room.wait(count).unwrap();
        }
        *count += 1;
    }

    /// Release a previously-acquired slot once its request is acknowledged.
    pub fn release(&self) {
        let mut count = self.state.lock().unwrap();
        if *count > 0 {
            *count -= 1;
        }
        self.room.notify_one();
    }

    pub fn outstanding(&self) -> usize {
        *self.state.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn limited_strategy_blocks_until_release() {
        let bp = Arc::new(Backpressure::new(BackpressureStrategy::LimitSize(1)));
        bp.acquire();
        assert_eq!(bp.outstanding(), 1);

        let bp2 = bp.clone();
        let handle = thread::spawn(move || {
            bp2.acquire();
        });

        thread::sleep(Duration::from_millis(20));
        bp.release();
        handle.join().unwrap();
        assert_eq!(bp.outstanding(), 1);
    }

    #[test]
    fn infinite_strategy_never_blocks() {
        let bp = Backpressure::new(BackpressureStrategy::Infinite);
        for _ in 0..1000 {
            bp.acquire();
        }
        assert_eq!(bp.outstanding(), 1000);
    }
}
