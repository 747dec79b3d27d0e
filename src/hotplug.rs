// DARKNESS HOTPLUG POLICY
// DECIDES WHETHER TO BRING ONE MORE CORE ONLINE OR TAKE THE LAST ONE DOWN.
//
// RATE GATING: ONE SHARED COUNTER, BUMPED EVERY TICK. THE UP BRANCH IS
// CHECKED WHEN counter % up_rate == 0, THE DOWN BRANCH OTHERWISE WHEN
// counter % down_rate == 0. ACTIVATION WINS WHEN BOTH ALIGN.

use crate::tuning::{Direction, HotplugFreqTable, TunableSnapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HotplugAction {
    Online(usize),
    Offline(usize),
}

// SHARED RATE-LIMIT COUNTER (num_rate). SINGLE WRITER: THE LOOP LOCK HOLDER.

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RateLimiter {
    count: u32,
}

impl RateLimiter {
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn tick(&mut self) -> u32 {
        self.count = self.count.wrapping_add(1);
        self.count
    }

    // PERIODIC RESYNC. >= SO A RUNTIME RATE DECREASE CANNOT LEAVE THE COUNTER
    // STRANDED ABOVE THE NEW PERIOD.
    pub fn resync(&mut self, up_rate: u32, down_rate: u32) {
        if self.count >= up_rate.max(down_rate) {
            self.count = 0;
        }
    }
}

/// What the hotplug policy sees of the boundary core this tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Boundary {
    pub online: usize,
    pub possible: usize,
    pub load: u32,
    pub next_freq: u32,
}

/// Pure decision. `is_online` is consulted for the candidate core only.
pub fn evaluate(
    counter: u32,
    b: &Boundary,
    t: &TunableSnapshot,
    table: &HotplugFreqTable,
    is_online: impl Fn(usize) -> bool,
) -> Option<HotplugAction> {
    if b.online == 0 {
        return None;
    }
    let up_rate = t.up_rate.max(1);
    let down_rate = t.down_rate.max(1);

    if !t.onecoresuspend && counter % up_rate == 0 && b.online < b.possible {
        let candidate = b.online;
        if b.load >= t.up_load
            && b.next_freq >= table.get(b.online, Direction::Up)
            && !is_online(candidate)
        {
            return Some(HotplugAction::Online(candidate));
        }
    } else if counter % down_rate == 0 && b.online > 1 {
        let boundary = b.online - 1;
        if (t.onecoresuspend
            || b.load < t.down_load
            || b.next_freq <= table.get(b.online, Direction::Down))
            && is_online(boundary)
        {
            return Some(HotplugAction::Offline(boundary));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuning::Tunables;

    fn snap() -> TunableSnapshot {
        let mut s = Tunables::new(4).snapshot();
        s.hotplug_enable = true;
        s
    }

    fn boundary(online: usize, load: u32, next_freq: u32) -> Boundary {
        Boundary { online, possible: 4, load, next_freq }
    }

    #[test]
    fn counter_resyncs_at_period() {
        let mut r = RateLimiter::default();
        for _ in 0..10 {
            r.tick();
        }
        r.resync(10, 5);
        assert_eq!(r.count(), 0);
    }

    #[test]
    fn counter_resyncs_after_rate_drop() {
        let mut r = RateLimiter::default();
        for _ in 0..8 {
            r.tick();
        }
        r.tick();
        r.resync(2, 1);
        assert_eq!(r.count(), 0);
    }

    #[test]
    fn up_branch_needs_both_load_and_freq() {
        let t = snap();
        let table = HotplugFreqTable::with_defaults(4);
        assert_eq!(
            evaluate(10, &boundary(1, 70, 600_000), &t, &table, |_| false),
            Some(HotplugAction::Online(1))
        );
        assert_eq!(evaluate(10, &boundary(1, 60, 600_000), &t, &table, |_| false), None);
        assert_eq!(evaluate(10, &boundary(1, 70, 400_000), &t, &table, |_| false), None);
    }

    #[test]
    fn up_branch_skips_already_online_candidate() {
        let t = snap();
        let table = HotplugFreqTable::with_defaults(4);
        assert_eq!(evaluate(10, &boundary(2, 90, 1_000_000), &t, &table, |_| true), None);
    }

    #[test]
    fn failed_up_condition_does_not_fall_through() {
        // COUNTER 10 IS A MULTIPLE OF BOTH RATES. UP GATE OPEN, LOAD TOO LOW:
        // THE DOWN BRANCH IS NOT TRIED THIS TICK.
        let t = snap();
        let table = HotplugFreqTable::with_defaults(4);
        assert_eq!(evaluate(10, &boundary(2, 0, 100_000), &t, &table, |_| true), None);
        // COUNTER 5: ONLY THE DOWN GATE IS OPEN
        assert_eq!(
            evaluate(5, &boundary(2, 0, 100_000), &t, &table, |_| true),
            Some(HotplugAction::Offline(1))
        );
    }

    #[test]
    fn all_cores_online_falls_to_down_branch() {
        let t = snap();
        let table = HotplugFreqTable::with_defaults(4);
        assert_eq!(
            evaluate(10, &boundary(4, 10, 150_000), &t, &table, |_| true),
            Some(HotplugAction::Offline(3))
        );
    }

    #[test]
    fn suspend_forces_down() {
        let mut t = snap();
        t.onecoresuspend = true;
        let table = HotplugFreqTable::with_defaults(4);
        assert_eq!(
            evaluate(5, &boundary(2, 100, 1_600_000), &t, &table, |_| true),
            Some(HotplugAction::Offline(1))
        );
        // NEVER BELOW ONE CORE
        assert_eq!(evaluate(5, &boundary(1, 100, 1_600_000), &t, &table, |_| true), None);
    }
}
