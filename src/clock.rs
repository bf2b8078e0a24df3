// src/clock.rs - Process-monotonic microsecond clock
//
// Arrival times and the RTP egress stamp both need a monotonic clock that
// reads as a plain integer. Anchoring one Instant per process gives every
// caller the same time base.

use std::sync::OnceLock;
use std::time::Instant;

static PROCESS_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Microseconds since the first call in this process. Monotonic, never
/// negative, wraps well past any realistic process lifetime.
pub fn monotonic_micros() -> i64 {
    PROCESS_EPOCH.get_or_init(Instant::now).elapsed().as_micros() as i64
}
