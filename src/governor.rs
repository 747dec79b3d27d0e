// DARKNESS GOVERNOR
// CONTROL LOOP + LIFECYCLE STATE MACHINE
//
// TWO LOCKS, DIFFERENT SCOPES. DO NOT MERGE:
//   LOOP LOCK:   EVERY TICK, AND START/STOP/LIMITS WHEN THEY TOUCH SAMPLE
//                STATE, POLICY HANDLES OR THE RATE COUNTER.
//   ENABLE LOCK: START/STOP REFCOUNT AND SURFACE PUBLISH/RETRACT. GATES
//                MANUAL tick_now(). LIMITS AND TIMER THREADS NEVER TAKE IT.
//   ORDER:       ENABLE BEFORE LOOP, NEVER THE REVERSE.
//
// ONE TIMER THREAD PER STARTED POLICY CPU. STOP CANCELS AND JOINS, SO NO
// TICK IS IN FLIGHT ONCE STOP RETURNS.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::error::GovernorError;
use crate::event::{self, EventLog, Snapshot, Totals};
use crate::freq::{effective_bounds, next_frequency};
use crate::hotplug::{self, Boundary, HotplugAction, RateLimiter};
use crate::platform::{Platform, Policy, Relation};
use crate::sample::SampleState;
use crate::tuning::Tunables;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheduling {
    /// One timer thread per started policy cpu.
    Timers,
    /// No threads. The embedder calls `tick_now()`.
    Manual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Inactive,
    Active,
}

/// What one pass of the control loop saw and did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub loads: Vec<Option<u32>>,
    pub targets: Vec<Option<u32>>,
    pub freq_changes: u32,
    pub action: Option<HotplugAction>,
    pub counter: u32,
}

struct LoopState {
    samples: Vec<SampleState>,
    policies: Vec<Option<Arc<Policy>>>,
    rate: RateLimiter,
    events: EventLog,
}

struct Bookkeeping {
    users: usize,
}

// --- TIMER ---

struct Cancel {
    flag: Mutex<bool>,
    cv: Condvar,
}

impl Cancel {
    fn new() -> Self {
        Self { flag: Mutex::new(false), cv: Condvar::new() }
    }

    fn is_set(&self) -> bool {
        *lock(&self.flag)
    }

    fn set(&self) {
        *lock(&self.flag) = true;
        self.cv.notify_all();
    }

    // SLEEP UP TO `timeout`. TRUE IF CANCELLED.
    fn wait(&self, timeout: Duration) -> bool {
        let guard = lock(&self.flag);
        let (guard, _) = self
            .cv
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

struct Timer {
    cancel: Arc<Cancel>,
    handle: Option<JoinHandle<()>>,
}

impl Timer {
    // RETURNS ONLY AFTER ANY IN-FLIGHT TICK FINISHED
    fn cancel_sync(mut self) {
        self.cancel.set();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("control loop timer panicked");
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ALL PER-CORE TIMERS TEND TO FIRE ON THE SAME PHASE WHEN MORE THAN ONE
// CORE IS ONLINE
pub fn next_delay(sampling_rate_us: u32, online: usize, now_us: u64) -> Duration {
    let delay = sampling_rate_us.max(1) as u64;
    let delay = if online > 1 { delay - now_us % delay } else { delay };
    Duration::from_micros(delay)
}

#[cfg(target_os = "linux")]
fn pin_to_cpu(cpu: usize) {
    // BEST EFFORT. AN OFFLINE TARGET JUST LEAVES THE THREAD UNPINNED.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(cpu, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            debug!("timer for cpu{} not pinned: {}", cpu, std::io::Error::last_os_error());
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_to_cpu(_cpu: usize) {}

fn run_timer(gov: Weak<Governor>, cpu: usize, cancel: Arc<Cancel>, first: Duration) {
    pin_to_cpu(cpu);
    let mut delay = first;
    loop {
        if cancel.wait(delay) {
            break;
        }
        let Some(gov) = gov.upgrade() else { break };
        match gov.timer_fired(&cancel) {
            Some(next) => delay = next,
            None => break,
        }
    }
    trace!("timer for cpu{} exited", cpu);
}

// --- GOVERNOR ---

pub struct Governor {
    platform: Platform,
    tunables: Arc<Tunables>,
    scheduling: Scheduling,
    loop_lock: Mutex<LoopState>,
    enable_lock: Mutex<Bookkeeping>,
    timers: Mutex<Vec<Option<Timer>>>,
    ticks: AtomicU64,
}

impl Governor {
    pub fn new(platform: Platform, scheduling: Scheduling) -> Self {
        let possible = platform.cores.possible().max(1);
        Self {
            tunables: Arc::new(Tunables::new(possible)),
            scheduling,
            loop_lock: Mutex::new(LoopState {
                samples: vec![SampleState::default(); possible],
                policies: vec![None; possible],
                rate: RateLimiter::default(),
                events: EventLog::new(),
            }),
            enable_lock: Mutex::new(Bookkeeping { users: 0 }),
            timers: Mutex::new((0..possible).map(|_| None).collect()),
            ticks: AtomicU64::new(0),
            platform,
        }
    }

    pub fn tunables(&self) -> &Arc<Tunables> {
        &self.tunables
    }

    pub fn possible(&self) -> usize {
        lock(&self.loop_lock).samples.len()
    }

    pub fn state(&self) -> State {
        if lock(&self.enable_lock).users > 0 {
            State::Active
        } else {
            State::Inactive
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn rate_counter(&self) -> u32 {
        lock(&self.loop_lock).rate.count()
    }

    pub fn event_totals(&self) -> Totals {
        lock(&self.loop_lock).events.totals()
    }

    pub fn dump_log(&self) {
        lock(&self.loop_lock).events.dump();
    }

    pub fn summary(&self) {
        lock(&self.loop_lock).events.summary();
    }

    fn current_delay(&self) -> Duration {
        next_delay(
            self.tunables.sampling_rate_us(),
            self.platform.cores.online_count(),
            event::now_ns() / 1_000,
        )
    }

    // --- LIFECYCLE: START (INACTIVE -> ACTIVE) ---

    pub fn start(self: &Arc<Self>, policy: &Arc<Policy>) -> Result<(), GovernorError> {
        let cpu = policy.cpu();
        let possible = self.possible();
        if cpu >= possible || !self.platform.cores.is_online(cpu) {
            return Err(GovernorError::CoreOffline(cpu));
        }
        if policy.cur() == 0 {
            return Err(GovernorError::NoCurrentFrequency(cpu));
        }

        let mut book = lock(&self.enable_lock);
        if lock(&self.timers)[cpu].is_some() {
            return Err(GovernorError::AlreadyRunning(cpu));
        }

        {
            let mut state = lock(&self.loop_lock);
            state.rate.reset();
            for c in 0..possible {
                state.policies[c] = Some(Arc::clone(policy));
                match self.platform.times.read(c) {
                    Ok(times) => state.samples[c] = SampleState::from_times(&times),
                    Err(e) => trace!("cpu{}: no initial sample: {}", c, e),
                }
            }
        }

        book.users += 1;
        if book.users == 1 {
            // SEED BEFORE PUBLISH SO THE SURFACE SHOWS THE REAL LIMITS
            self.tunables.seed_limits(policy.min(), policy.max());
            if let Err(e) = self.platform.surface.publish(&self.tunables) {
                book.users -= 1;
                self.clear_policies();
                return Err(GovernorError::Surface(e.to_string()));
            }
        }

        if let Err(e) = self.schedule(cpu) {
            book.users -= 1;
            if book.users == 0 {
                self.clear_policies();
                self.platform.surface.retract();
            }
            return Err(e);
        }

        info!(
            "START cpu{}: {} kHz (limits {}..{}), users={}",
            cpu, policy.cur(), policy.min(), policy.max(), book.users
        );
        Ok(())
    }

    fn schedule(self: &Arc<Self>, cpu: usize) -> Result<(), GovernorError> {
        let cancel = Arc::new(Cancel::new());
        let handle = match self.scheduling {
            Scheduling::Manual => None,
            Scheduling::Timers => {
                let first = self.current_delay();
                let weak = Arc::downgrade(self);
                let c = Arc::clone(&cancel);
                let handle = std::thread::Builder::new()
                    .name(format!("darkness-cpu{}", cpu))
                    .spawn(move || run_timer(weak, cpu, c, first))
                    .map_err(GovernorError::Timer)?;
                Some(handle)
            }
        };
        lock(&self.timers)[cpu] = Some(Timer { cancel, handle });
        Ok(())
    }

    // --- LIFECYCLE: STOP (ACTIVE -> INACTIVE) ---

    pub fn stop(&self, policy: &Policy) -> Result<(), GovernorError> {
        let cpu = policy.cpu();
        let mut book = lock(&self.enable_lock);

        // ONLY A CPU WITH A RUNNING SESSION CAN BE STOPPED
        let timer = lock(&self.timers).get_mut(cpu).and_then(Option::take);
        let Some(timer) = timer else {
            return Err(GovernorError::NotActive);
        };
        // TIMER THREADS NEVER TAKE THE ENABLE LOCK, JOINING UNDER IT IS SAFE
        timer.cancel_sync();

        book.users = book.users.saturating_sub(1);
        self.clear_policies();
        if book.users == 0 {
            self.platform.surface.retract();
        }
        info!("STOP cpu{}: users={}", cpu, book.users);
        Ok(())
    }

    fn clear_policies(&self) {
        let mut state = lock(&self.loop_lock);
        for p in state.policies.iter_mut() {
            *p = None;
        }
    }

    // --- LIFECYCLE: LIMITS (NO STATE CHANGE) ---

    /// Pull the running frequency back inside `policy`'s new bounds.
    /// Returns the frequency now in effect when a correction was applied.
    pub fn limits(&self, policy: &Policy) -> Option<u32> {
        let state = lock(&self.loop_lock);
        let registered = state.policies.get(policy.cpu()).cloned().flatten()?;
        let cur = registered.cur();

        let (target, relation) = if policy.max() < cur {
            (policy.max(), Relation::High)
        } else if policy.min() > cur {
            (policy.min(), Relation::Low)
        } else {
            return None;
        };

        match self.platform.freq.apply(&registered, target, relation) {
            Ok(effective) => {
                registered.set_cur(effective);
                info!("LIMITS cpu{}: {} -> {} kHz", policy.cpu(), cur, effective);
                Some(effective)
            }
            Err(e) => {
                warn!("LIMITS cpu{}: failed to apply {} kHz: {}", policy.cpu(), target, e);
                None
            }
        }
    }

    // --- CONTROL LOOP ---

    fn timer_fired(&self, cancel: &Cancel) -> Option<Duration> {
        let mut state = lock(&self.loop_lock);
        if cancel.is_set() {
            return None;
        }
        self.check_cpu(&mut state);
        let delay = self.current_delay();
        drop(state);
        Some(delay)
    }

    /// Run one sampling + decision pass under the loop lock.
    /// While inactive nothing is sampled, counted or logged.
    pub fn tick_now(&self) -> TickReport {
        // LOCK ORDER: ENABLE, THEN LOOP (SAME AS START)
        let book = lock(&self.enable_lock);
        if book.users == 0 {
            return TickReport::default();
        }
        let mut state = lock(&self.loop_lock);
        self.check_cpu(&mut state)
    }

    fn check_cpu(&self, state: &mut LoopState) -> TickReport {
        let t = self.tunables.snapshot();
        let cores = &self.platform.cores;
        let possible = state.samples.len();
        let online_cpus = cores.online_cpus();
        let online = online_cpus.len();

        let mut report = TickReport {
            loads: vec![None; possible],
            targets: vec![None; possible],
            ..Default::default()
        };
        let mut hotplug_enable = t.hotplug_enable;

        // SAMPLE + FREQUENCY, EVERY ONLINE CORE, BEFORE ANY HOTPLUG DECISION
        for &cpu in &online_cpus {
            let Some(sample) = state.samples.get_mut(cpu) else {
                hotplug_enable = false;
                continue;
            };
            let load = match self.platform.times.read(cpu) {
                Ok(times) => sample.update(&times),
                Err(e) => {
                    debug!("cpu{}: {}", cpu, e);
                    None
                }
            };
            let policy = state.policies.get(cpu).cloned().flatten();
            let (Some(policy), Some(load)) = (policy, load) else {
                // EVALUATE THIS CORE NEXT TIME
                hotplug_enable = false;
                continue;
            };
            report.loads[cpu] = Some(load);

            let bounds = effective_bounds(t.min_freq_limit, t.max_freq_limit, policy.min(), policy.max());
            let cur = policy.cur();
            let next = next_frequency(load, bounds, cur, &t);
            report.targets[cpu] = Some(next);

            if next != cur {
                match self.platform.freq.apply(&policy, next, Relation::Low) {
                    Ok(effective) => {
                        policy.set_cur(effective);
                        report.freq_changes += 1;
                        debug!("cpu{}: load {}% {} -> {} kHz", cpu, load, cur, effective);
                    }
                    Err(e) => warn!("cpu{}: failed to apply {} kHz: {}", cpu, next, e),
                }
            }
        }

        let counter = state.rate.tick();

        if hotplug_enable && online > 0 {
            let boundary_cpu = online - 1;
            let load = report.loads.get(boundary_cpu).copied().flatten();
            let next_freq = report.targets.get(boundary_cpu).copied().flatten();
            if let (Some(load), Some(next_freq)) = (load, next_freq) {
                let b = Boundary { online, possible, load, next_freq };
                let decision = hotplug::evaluate(
                    counter, &b, &t, self.tunables.hotplug_freq(), |c| cores.is_online(c),
                );
                if let Some(action) = decision {
                    if self.apply_hotplug(action, &b) {
                        state.rate.reset();
                        report.action = Some(action);
                    }
                }
            }
        }

        state.rate.resync(t.up_rate, t.down_rate);
        report.counter = state.rate.count();

        let sampled: Vec<u32> = report.loads.iter().flatten().copied().collect();
        let avg_load = if sampled.is_empty() {
            0
        } else {
            sampled.iter().sum::<u32>() / sampled.len() as u32
        };
        let freq = state.policies.iter().flatten().next().map(|p| p.cur()).unwrap_or(0);
        state.events.record(Snapshot {
            online: online as u32,
            avg_load,
            freq,
            freq_changes: report.freq_changes,
            counter: report.counter,
            action: report.action,
            ..Default::default()
        });

        self.ticks.fetch_add(1, Ordering::Relaxed);
        report
    }

    fn apply_hotplug(&self, action: HotplugAction, b: &Boundary) -> bool {
        let result = match action {
            HotplugAction::Online(cpu) => self.platform.cores.bring_online(cpu),
            HotplugAction::Offline(cpu) => self.platform.cores.take_offline(cpu),
        };
        match result {
            Ok(()) => {
                info!(
                    "HOTPLUG {:?}: online={} load={}% next={} kHz",
                    action, b.online, b.load, b.next_freq
                );
                true
            }
            Err(e) => {
                warn!("HOTPLUG {:?} failed: {}", action, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_core_delay_is_full_period() {
        assert_eq!(next_delay(60_000, 1, 12_345), Duration::from_micros(60_000));
    }

    #[test]
    fn multi_core_delay_aligns_to_period() {
        // 12_345 % 60_000 = 12_345 -> 47_655 LEFT IN THIS PERIOD
        assert_eq!(next_delay(60_000, 2, 12_345), Duration::from_micros(47_655));
        // EXACTLY ON A BOUNDARY -> FULL PERIOD
        assert_eq!(next_delay(60_000, 4, 120_000), Duration::from_micros(60_000));
    }

    #[test]
    fn delay_never_zero() {
        assert!(next_delay(10_000, 3, 19_999) >= Duration::from_micros(1));
        assert_eq!(next_delay(0, 1, 0), Duration::from_micros(1));
    }

    #[test]
    fn cancel_wakes_waiter() {
        let cancel = Arc::new(Cancel::new());
        let c = Arc::clone(&cancel);
        let waiter = std::thread::spawn(move || c.wait(Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(20));
        cancel.set();
        assert!(waiter.join().unwrap_or(false));
    }

    #[test]
    fn wait_times_out_when_not_cancelled() {
        let cancel = Cancel::new();
        assert!(!cancel.wait(Duration::from_millis(5)));
    }
}
