// DARKNESS FREQUENCY POLICY
// LOAD -> TARGET FREQUENCY. TWO MUTUALLY EXCLUSIVE MODES:
//   CONTINUOUS: PROPORTIONAL SCALING, QUANTIZED TO 100MHZ WITH ASYMMETRIC ROUNDING
//   STEPPED:    FIRST PROFILE ROW AT OR BELOW THE RAW TARGET (FORCE_FREQS_STEP 1..3)

use crate::tuning::TunableSnapshot;

pub const FREQ_QUANTUM: u32 = 100_000;
pub const SF_STEP_UNIT: u32 = 1_000;

// STEPPED PROFILE TABLE (KHZ)
// ROWS IN DESCENDING ORDER. COLUMN = FORCE_FREQS_STEP (COLUMN 0 IS THE
// UNRESTRICTED LADDER AND IS NEVER SELECTED).

pub const FREQS_STEP: [[u32; 4]; 16] = [
    [1_600_000, 1_500_000, 1_500_000, 1_500_000],
    [1_500_000, 1_400_000, 1_300_000, 1_300_000],
    [1_400_000, 1_300_000, 1_200_000, 1_200_000],
    [1_300_000, 1_200_000, 1_000_000, 1_000_000],
    [1_200_000, 1_100_000,   800_000,   800_000],
    [1_100_000, 1_000_000,   600_000,   500_000],
    [1_000_000,   800_000,   500_000,   200_000],
    [  900_000,   600_000,   400_000,   100_000],
    [  800_000,   500_000,   200_000,   100_000],
    [  700_000,   400_000,   100_000,   100_000],
    [  600_000,   200_000,   100_000,   100_000],
    [  500_000,   100_000,   100_000,   100_000],
    [  400_000,   100_000,   100_000,   100_000],
    [  300_000,   100_000,   100_000,   100_000],
    [  200_000,   100_000,   100_000,   100_000],
    [  100_000,   100_000,   100_000,   100_000],
];

/// Per-core bounds after clamping the global limits into the policy range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreqBounds {
    pub min: u32,
    pub max: u32,
}

impl FreqBounds {
    pub fn clamp(&self, freq: u32) -> u32 {
        freq.min(self.max).max(self.min)
    }
}

// A GLOBAL LIMIT OUTSIDE THE POLICY RANGE FALLS BACK TO THE POLICY'S OWN BOUND
pub fn effective_bounds(min_limit: u32, max_limit: u32, policy_min: u32, policy_max: u32) -> FreqBounds {
    let max = if max_limit > policy_max || max_limit < policy_min {
        policy_max
    } else {
        max_limit
    };
    let min = if min_limit < policy_min || min_limit > policy_max {
        policy_min
    } else {
        min_limit
    };
    // TORN MIN/MAX READ DURING A WRITE: PREFER THE UPPER BOUND
    FreqBounds { min: min.min(max), max }
}

// LOAD * (MAX / 100), CLAMPED. INTEGER DIVISION FIRST.
pub fn raw_target(load: u32, bounds: FreqBounds) -> u32 {
    let scaled = load.min(100).saturating_mul(bounds.max / 100);
    bounds.clamp(scaled)
}

pub fn quantize(raw: u32, cur: u32, up_sf_step: u32, down_sf_step: u32) -> u32 {
    let mut next = (raw / FREQ_QUANTUM) * FREQ_QUANTUM;
    let rem = raw % FREQ_QUANTUM;
    if (next > cur && rem > up_sf_step * SF_STEP_UNIT)
        || (next < cur && rem > down_sf_step * SF_STEP_UNIT)
    {
        next = next.saturating_add(FREQ_QUANTUM);
    }
    next
}

pub fn step_profile(raw: u32, force_step: u32) -> Option<u32> {
    let col = force_step as usize;
    if col == 0 || col >= FREQS_STEP[0].len() {
        return None;
    }
    FREQS_STEP.iter().map(|row| row[col]).find(|&f| f <= raw)
}

/// Computes the next frequency for one core. Never outside `bounds`.
pub fn next_frequency(load: u32, bounds: FreqBounds, cur: u32, t: &TunableSnapshot) -> u32 {
    let raw = raw_target(load, bounds);
    let next = if t.force_freqs_step == 0 {
        quantize(raw, cur, t.up_sf_step, t.down_sf_step)
    } else {
        step_profile(raw, t.force_freqs_step).unwrap_or(bounds.min)
    };
    bounds.clamp(next)
}
