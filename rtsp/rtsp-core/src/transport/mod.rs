pub(crate) mod multicast;
pub(crate) mod udp;

use std::sync::OnceLock;
use std::time::Instant;

static MONOTONIC_START: OnceLock<Instant> = OnceLock::new();

/// Milliseconds on a process wide monotonic clock, used for the per-media
/// last-packet liveness stamps
pub(crate) fn monotonic_ms() -> u64 {
    MONOTONIC_START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis() as u64
}
