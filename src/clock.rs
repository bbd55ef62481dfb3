//! Millisecond wall-clock timestamps with a monotonicity guarantee.
//!
//! Dedup keys are `(sender, timestamp)`, so two packets originated by this
//! process must never share a timestamp. The wall clock is bumped by one
//! millisecond whenever it would tie or run backwards.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static LAST_TIMESTAMP: AtomicU64 = AtomicU64::new(0);

/// Current time in milliseconds since the Unix epoch.
pub fn unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Strictly increasing timestamp for packets this node originates.
pub fn monotonic_timestamp_ms() -> u64 {
    let now = unix_timestamp_ms();
    let mut last = LAST_TIMESTAMP.load(Ordering::Relaxed);

    loop {
        let next = now.max(last + 1);

        match LAST_TIMESTAMP.compare_exchange_weak(
            last,
            next,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return next,
            Err(observed) => last = observed,
        }
    }
}
