// DARKNESS PLATFORM SEAMS
// THE GOVERNOR DECIDES. THESE TRAITS ACT: APPLY A FREQUENCY, FLIP A CORE,
// READ TIME COUNTERS, PUBLISH THE TUNABLES.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::PlatformError;
use crate::sample::CpuTimes;
use crate::tuning::Tunables;

/// Which available frequency to pick around a target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relation {
    /// Lowest frequency at or above the target.
    Low,
    /// Highest frequency at or below the target.
    High,
}

// POLICY HANDLE
// OWNED BY THE FRAMEWORK, SHARED WITH THE CONTROL LOOP FOR ONE SESSION.
// MIN/MAX ARE THE DOMAIN'S CURRENT BOUNDS, CUR IS THE FREQUENCY IN EFFECT.

#[derive(Debug)]
pub struct Policy {
    cpu: usize,
    min: AtomicU32,
    max: AtomicU32,
    cur: AtomicU32,
}

impl Policy {
    pub fn new(cpu: usize, min: u32, max: u32, cur: u32) -> Self {
        Self {
            cpu,
            min: AtomicU32::new(min),
            max: AtomicU32::new(max),
            cur: AtomicU32::new(cur),
        }
    }

    pub fn cpu(&self) -> usize {
        self.cpu
    }

    pub fn min(&self) -> u32 {
        self.min.load(Ordering::Relaxed)
    }

    pub fn max(&self) -> u32 {
        self.max.load(Ordering::Relaxed)
    }

    pub fn cur(&self) -> u32 {
        self.cur.load(Ordering::Relaxed)
    }

    pub fn set_limits(&self, min: u32, max: u32) {
        self.min.store(min, Ordering::Relaxed);
        self.max.store(max, Ordering::Relaxed);
    }

    pub fn set_cur(&self, cur: u32) {
        self.cur.store(cur, Ordering::Relaxed);
    }
}

pub trait FreqDriver: Send + Sync {
    /// Apply `target` to the policy's domain. Returns the frequency now in effect.
    fn apply(&self, policy: &Policy, target: u32, relation: Relation) -> Result<u32, PlatformError>;
}

pub trait CoreControl: Send + Sync {
    fn possible(&self) -> usize;
    fn is_online(&self, cpu: usize) -> bool;
    fn bring_online(&self, cpu: usize) -> Result<(), PlatformError>;
    fn take_offline(&self, cpu: usize) -> Result<(), PlatformError>;

    fn online_cpus(&self) -> Vec<usize> {
        (0..self.possible()).filter(|&c| self.is_online(c)).collect()
    }

    fn online_count(&self) -> usize {
        self.online_cpus().len()
    }
}

pub trait TimeSource: Send + Sync {
    fn read(&self, cpu: usize) -> Result<CpuTimes, PlatformError>;
}

pub trait ConfigSurface: Send + Sync {
    fn publish(&self, tunables: &Arc<Tunables>) -> Result<(), PlatformError>;
    fn retract(&self);
}

/// The three hardware collaborators plus the configuration surface.
#[derive(Clone)]
pub struct Platform {
    pub freq: Arc<dyn FreqDriver>,
    pub cores: Arc<dyn CoreControl>,
    pub times: Arc<dyn TimeSource>,
    pub surface: Arc<dyn ConfigSurface>,
}
