//! Cheap unix-nanosecond clock reads.
//!
//! `SystemTime::now` is too expensive to call per message on the hot receive
//! path, so the wall clock is sampled once and subsequent reads add the
//! monotonic elapsed time to that anchor.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

struct Anchor {
    instant: Instant,
    unix_ns: u64,
}

static ANCHOR: OnceLock<Anchor> = OnceLock::new();

fn anchor() -> &'static Anchor {
    ANCHOR.get_or_init(|| Anchor {
        instant: Instant::now(),
        unix_ns: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0),
    })
}

/// Estimated current unix time in nanoseconds.
pub fn now_unix_ns_estimate() -> u64 {
    let a = anchor();
    a.unix_ns + a.instant.elapsed().as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimates_are_monotonic() {
        let first = now_unix_ns_estimate();
        let second = now_unix_ns_estimate();
        assert!(second >= first);
    }

    #[test]
    fn estimate_tracks_wall_clock() {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64;
        let estimate = now_unix_ns_estimate();
        let drift = estimate.abs_diff(wall);
        assert!(drift < 1_000_000_000, "drift {drift}ns");
    }
}
