//! Admission control: how many jobs may be dispatched this tick

use acp_core::policy::clamp_int;
use acp_core::SystemSnapshot;

/// Dispatch cap used when none is configured
pub const DEFAULT_MAX_PARALLELISM: i64 = 10;

/// Queue depth at which the chief stops trickling and dispatches in bulk
const BULK_THRESHOLD: u32 = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChiefOptions {
    /// Upper bound on jobs dispatched per tick, clamped to 1-20
    pub max_parallelism: Option<i64>,
}

impl ChiefOptions {
    pub fn configured_max(&self) -> u32 {
        clamp_int(self.max_parallelism, 1, 20, DEFAULT_MAX_PARALLELISM) as u32
    }
}

/// Decide the dispatch limit for one tick.
///
/// Nothing moves while the emergency stop is active or the circuit breaker
/// is open. A deep queue gets the full configured cap; a shallow one gets a
/// small trickle, with an extra slot when the fleet is idle so a cold start
/// ramps up quickly.
pub fn decide_dispatch_limit(snapshot: &SystemSnapshot, opts: &ChiefOptions) -> u32 {
    if snapshot.emergency_stop.active || snapshot.circuit_breaker.is_open() {
        return 0;
    }

    let max = opts.configured_max();
    let depth = snapshot.queue_depth;
    if depth >= max {
        return max;
    }
    if depth >= BULK_THRESHOLD {
        return max.min(depth.max(BULK_THRESHOLD));
    }

    let idle_boost = if snapshot.active_jobs == 0 { 2 } else { 1 };
    max.min((depth + idle_boost).max(1))
}
