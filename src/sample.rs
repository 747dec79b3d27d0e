// DARKNESS SAMPLE COLLECTOR
// CUMULATIVE TIME COUNTERS IN, DELTA-BASED LOAD PERCENTAGE OUT.

/// Cumulative per-core time accounting counters, monotonic since boot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    // IRQ + SOFTIRQ + STEAL + NICE COUNT AS BUSY
    pub fn others(&self) -> u64 {
        self.irq
            .wrapping_add(self.softirq)
            .wrapping_add(self.steal)
            .wrapping_add(self.nice)
    }
}

/// Previous snapshot for one core. Owned by the control loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SampleState {
    prev_user: u64,
    prev_system: u64,
    prev_others: u64,
    prev_idle: u64,
    prev_iowait: u64,
}

impl SampleState {
    pub fn from_times(t: &CpuTimes) -> Self {
        Self {
            prev_user: t.user,
            prev_system: t.system,
            prev_others: t.others(),
            prev_idle: t.idle,
            prev_iowait: t.iowait,
        }
    }

    /// Replace the snapshot with `now` and return the load since the last
    /// sample, or `None` when no time elapsed in any category.
    pub fn update(&mut self, now: &CpuTimes) -> Option<u32> {
        let others = now.others();

        let busy = now.user.wrapping_sub(self.prev_user)
            .wrapping_add(now.system.wrapping_sub(self.prev_system))
            .wrapping_add(others.wrapping_sub(self.prev_others));
        let idle = now.idle.wrapping_sub(self.prev_idle)
            .wrapping_add(now.iowait.wrapping_sub(self.prev_iowait));

        *self = Self::from_times(now);

        compute_load(busy, idle)
    }
}

// LOAD = FLOOR(100 * BUSY / TOTAL). ZERO BUSY REPORTS 1, NOT 0.
pub fn compute_load(busy: u64, idle: u64) -> Option<u32> {
    let total = busy.checked_add(idle)?;
    if total == 0 {
        return None;
    }
    if busy == 0 {
        return Some(1);
    }
    Some((busy as u128 * 100 / total as u128) as u32)
}
