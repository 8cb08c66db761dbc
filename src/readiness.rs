use std::time::{SystemTime, UNIX_EPOCH};

use alloy::primitives::U256;

/// Snapshot of a single orchid's on-chain state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchidState {
    pub token: U256,
    pub alive: bool,
    /// Number of times the orchid has been watered
    pub water_level: u64,
    /// Epoch seconds at which the bulb was planted
    pub planted_at: u64,
}

/// Current wall-clock time in whole epoch seconds
pub fn now_epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Number of complete growth cycles between planting and `now`
///
/// Returns `None` when no cycle can be counted: the orchid was planted in
/// the current second or later, or the growth cycle is zero.
pub fn full_cycles(planted_at: u64, growth_cycle: u64, now: u64) -> Option<u64> {
    let elapsed = now.checked_sub(planted_at).filter(|e| *e > 0)?;
    elapsed.checked_div(growth_cycle)
}

/// Decide whether an orchid needs watering
///
/// A living orchid is ready when it has been watered fewer times than the
/// number of growth cycles it has lived through. Dead orchids are never ready.
pub fn ready_for_watering(state: &OrchidState, growth_cycle: u64, now: u64) -> bool {
    if !state.alive {
        return false;
    }

    match full_cycles(state.planted_at, growth_cycle, now) {
        Some(cycles) => state.water_level < cycles,
        None => false,
    }
}

/// Gas limit to submit with: the estimate, raised to the configured floor
pub fn select_gas_limit(estimate: u64, floor: Option<u64>) -> u64 {
    estimate.max(floor.unwrap_or(0))
}
