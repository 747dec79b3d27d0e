// DARKNESS EVENT LOG
// RECORDS ONE SNAPSHOT PER CONTROL-LOOP TICK
// PRE-ALLOCATED RING BUFFER. NO HEAP ALLOCATION WHILE THE LOOP RUNS.
// WRAPS AROUND AT CAPACITY -- OLDEST ENTRIES OVERWRITTEN.

use crate::hotplug::HotplugAction;

const MAX_SNAPSHOTS: usize = 8192;

#[derive(Clone, Copy, Default)]
pub struct Snapshot {
    pub ts_ns:        u64,
    pub online:       u32,
    pub avg_load:     u32,
    pub freq:         u32,
    pub freq_changes: u32,
    pub counter:      u32,
    pub action:       Option<HotplugAction>,
}

pub struct EventLog {
    snapshots: Vec<Snapshot>,
    head:      usize,
    len:       usize,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            snapshots: vec![Snapshot::default(); MAX_SNAPSHOTS],
            head: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // RECORD ONE TICK. OVERWRITES OLDEST ENTRY WHEN FULL.
    pub fn record(&mut self, snap: Snapshot) {
        self.snapshots[self.head] = Snapshot { ts_ns: now_ns(), ..snap };
        self.head = (self.head + 1) % MAX_SNAPSHOTS;
        if self.len < MAX_SNAPSHOTS {
            self.len += 1;
        }
    }

    // ITERATE SNAPSHOTS IN CHRONOLOGICAL ORDER
    pub fn iter_chronological(&self) -> impl Iterator<Item = &Snapshot> {
        let start = if self.len < MAX_SNAPSHOTS { 0 } else { self.head };
        (0..self.len).map(move |i| {
            &self.snapshots[(start + i) % MAX_SNAPSHOTS]
        })
    }

    pub fn last(&self) -> Option<&Snapshot> {
        if self.len == 0 {
            return None;
        }
        Some(&self.snapshots[(self.head + MAX_SNAPSHOTS - 1) % MAX_SNAPSHOTS])
    }

    // DUMP THE TIME SERIES
    pub fn dump(&self) {
        let mut iter = self.iter_chronological();
        let first = match iter.next() {
            Some(s) => s,
            None => return,
        };
        let base_ts = first.ts_ns;

        println!("\n{:<10} {:<8} {:<6} {:<10} {:<8} {:<6} {:<10}",
            "TIME_S", "ONLINE", "LOAD", "FREQ", "CHANGES", "RATE", "HOTPLUG");
        println!("{}", "-".repeat(64));

        for s in std::iter::once(first).chain(iter) {
            let elapsed_s = s.ts_ns.saturating_sub(base_ts) as f64 / 1_000_000_000.0;
            println!("{:<10.2} {:<8} {:<6} {:<10} {:<8} {:<6} {:<10}",
                elapsed_s, s.online, s.avg_load, s.freq, s.freq_changes,
                s.counter, action_label(s.action));
        }

        if self.len == MAX_SNAPSHOTS {
            println!("\n(RING BUFFER WRAPPED -- SHOWING MOST RECENT {} SNAPSHOTS)", MAX_SNAPSHOTS);
        }
        println!("TOTAL SNAPSHOTS: {}", self.len);
    }

    pub fn totals(&self) -> Totals {
        let mut t = Totals::default();
        let mut load_sum = 0u64;
        for s in self.iter_chronological() {
            t.ticks += 1;
            t.freq_changes += s.freq_changes as u64;
            load_sum += s.avg_load as u64;
            match s.action {
                Some(HotplugAction::Online(_)) => t.activations += 1,
                Some(HotplugAction::Offline(_)) => t.deactivations += 1,
                None => {}
            }
            t.peak_online = t.peak_online.max(s.online);
        }
        if t.ticks > 0 {
            t.avg_load = (load_sum / t.ticks) as u32;
        }
        t
    }

    // SUMMARY STATISTICS
    pub fn summary(&self) {
        if self.len < 2 {
            return;
        }

        let t = self.totals();
        let first_ts = self.iter_chronological().next().map(|s| s.ts_ns).unwrap_or(0);
        let last_ts = self.last().map(|s| s.ts_ns).unwrap_or(first_ts);
        let elapsed_s = last_ts.saturating_sub(first_ts) as f64 / 1_000_000_000.0;

        println!("\n{}", "=".repeat(50));
        println!("DARKNESS SUMMARY");
        println!("{}", "=".repeat(50));
        println!("  TICKS:             {}", t.ticks);
        println!("  FREQ CHANGES:      {}", t.freq_changes);
        println!("  CORES UP:          {}", t.activations);
        println!("  CORES DOWN:        {}", t.deactivations);
        println!("  PEAK ONLINE:       {}", t.peak_online);
        println!("  AVG LOAD:          {}%", t.avg_load);
        println!("  ELAPSED:           {:.1}s", elapsed_s);
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Totals {
    pub ticks:         u64,
    pub freq_changes:  u64,
    pub activations:   u64,
    pub deactivations: u64,
    pub peak_online:   u32,
    pub avg_load:      u32,
}

fn action_label(action: Option<HotplugAction>) -> String {
    match action {
        Some(HotplugAction::Online(cpu)) => format!("UP cpu{}", cpu),
        Some(HotplugAction::Offline(cpu)) => format!("DOWN cpu{}", cpu),
        None => "-".into(),
    }
}

pub fn now_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(online: u32, load: u32, action: Option<HotplugAction>) -> Snapshot {
        Snapshot { online, avg_load: load, freq: 800_000, action, ..Default::default() }
    }

    #[test]
    fn snapshot_records() {
        let mut log = EventLog::new();
        assert_eq!(log.len, 0);

        log.record(snap(2, 40, None));
        assert_eq!(log.len, 1);
        assert_eq!(log.snapshots[0].online, 2);
        assert_eq!(log.snapshots[0].avg_load, 40);
        assert_eq!(log.snapshots[0].freq, 800_000);
        assert!(log.snapshots[0].ts_ns > 0);
    }

    #[test]
    fn ring_buffer_wraps() {
        let mut log = EventLog::new();

        // FILL TO CAPACITY
        for i in 0..MAX_SNAPSHOTS {
            log.record(snap(1, (i % 100) as u32, None));
        }
        assert_eq!(log.len, MAX_SNAPSHOTS);
        assert_eq!(log.head, 0); // WRAPPED BACK TO START

        // WRITE ONE MORE -- OVERWRITES OLDEST
        log.record(Snapshot { freq: 9999, ..snap(1, 0, None) });
        assert_eq!(log.len, MAX_SNAPSHOTS);
        assert_eq!(log.head, 1);
        assert_eq!(log.snapshots[0].freq, 9999);
        assert_eq!(log.last().map(|s| s.freq), Some(9999));

        // CHRONOLOGICAL ITERATION STARTS FROM OLDEST (INDEX 1)
        let ordered: Vec<u32> = log.iter_chronological()
            .map(|s| s.avg_load)
            .collect();
        assert_eq!(ordered[0], 1); // OLDEST SURVIVING ENTRY
        assert_eq!(ordered.len(), MAX_SNAPSHOTS);
    }

    #[test]
    fn totals_count_hotplug() {
        let mut log = EventLog::new();
        log.record(snap(1, 80, Some(HotplugAction::Online(1))));
        log.record(snap(2, 20, None));
        log.record(snap(2, 20, Some(HotplugAction::Offline(1))));
        let t = log.totals();
        assert_eq!(t.ticks, 3);
        assert_eq!(t.activations, 1);
        assert_eq!(t.deactivations, 1);
        assert_eq!(t.peak_online, 2);
        assert_eq!(t.avg_load, 40);
    }

    #[test]
    fn summary_no_panic_empty() {
        let log = EventLog::new();
        log.summary(); // SHOULD NOT PANIC WITH 0 SNAPSHOTS
        log.dump();
    }

    #[test]
    fn dump_no_panic() {
        let mut log = EventLog::new();
        log.record(snap(1, 50, None));
        log.record(snap(2, 70, Some(HotplugAction::Online(1))));
        log.dump(); // SHOULD NOT PANIC
        log.summary();
    }
}
