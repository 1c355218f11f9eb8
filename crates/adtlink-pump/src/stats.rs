use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Live counters for one ADT instance.
#[derive(Debug, Default)]
pub(crate) struct InstanceStats {
    pub rx_batches: AtomicU64,
    pub rx_packets: AtomicU64,
    pub rx_missed_batches: AtomicU64,
    pub rx_missed_bytes: AtomicU64,
    pub rx_corrupt: AtomicU64,
    pub tx_packets: AtomicU64,
    pub tx_bytes: AtomicU64,
    pub tx_transfers: AtomicU64,
    pub tx_retries: AtomicU64,
    pub tx_dropped_bytes: AtomicU64,
    pub tx_corrupt: AtomicU64,
}

impl InstanceStats {
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            rx_batches: get(&self.rx_batches),
            rx_packets: get(&self.rx_packets),
            rx_missed_batches: get(&self.rx_missed_batches),
            rx_missed_bytes: get(&self.rx_missed_bytes),
            rx_corrupt: get(&self.rx_corrupt),
            tx_packets: get(&self.tx_packets),
            tx_bytes: get(&self.tx_bytes),
            tx_transfers: get(&self.tx_transfers),
            tx_retries: get(&self.tx_retries),
            tx_dropped_bytes: get(&self.tx_dropped_bytes),
            tx_corrupt: get(&self.tx_corrupt),
        }
    }
}

/// Point-in-time copy of an instance's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Inbound batches accepted into the RX ring.
    pub rx_batches: u64,
    /// Packets dispatched to the handler.
    pub rx_packets: u64,
    /// Inbound batches dropped for lack of RX space.
    pub rx_missed_batches: u64,
    pub rx_missed_bytes: u64,
    /// Inbound batches or ring clips that ended in malformed bytes.
    pub rx_corrupt: u64,
    /// Packets handed to the transport.
    pub tx_packets: u64,
    pub tx_bytes: u64,
    /// Successful transport send sequences (one per flush).
    pub tx_transfers: u64,
    pub tx_retries: u64,
    /// Bytes dropped after the transport refused them.
    pub tx_dropped_bytes: u64,
    pub tx_corrupt: u64,
}

/// Rate limiter for repetitive warnings.
///
/// `check` lets one event through per interval and counts the rest, so the
/// next emitted log line can report how many were swallowed.
#[derive(Debug)]
pub struct LogThrottle {
    interval: Duration,
    last: Mutex<Option<Instant>>,
    suppressed: AtomicU64,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Returns `Some(suppressed_since_last)` when the caller should log now.
    pub fn check(&self) -> Option<u64> {
        let now = Instant::now();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(at) if now.duration_since(at) < self.interval => {
                self.suppressed.fetch_add(1, Ordering::Relaxed);
                None
            }
            _ => {
                *last = Some(now);
                Some(self.suppressed.swap(0, Ordering::Relaxed))
            }
        }
    }
}
