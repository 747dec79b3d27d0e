// DARKNESS TUNABLES
// PURE-RUST MODULE: NO SYSFS, NO THREADS. TESTABLE OFFLINE.
//
// EVERY KNOB IS ITS OWN ATOMIC. READERS (ANY CORE'S CONTROL LOOP) AND
// WRITERS (THE CONFIGURATION SURFACE) NEVER COORDINATE. A TORN MIN/MAX
// PAIR DURING A WRITE IS CORRECTED BY CLAMPING ON THE NEXT TICK.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::TuningError;

// LIMITS

pub const MIN_SAMPLING_RATE_US: u32 = 10_000;
pub const MAX_HOTPLUG_RATE: u32     = 40;
pub const MAX_LOAD: u32             = 100;
pub const MAX_SF_STEP: u32          = 99;
pub const MAX_FORCE_STEP: u32       = 3;
pub const MAX_FREQ_LIMIT: u32       = 1_600_000;  // HARDWARE CEILING (KHZ)

// DEFAULTS

pub const DEFAULT_SAMPLING_RATE_US: u32 = 60_000;
pub const DEFAULT_UP_RATE: u32          = 10;
pub const DEFAULT_DOWN_RATE: u32        = 5;
pub const DEFAULT_UP_LOAD: u32          = 65;
pub const DEFAULT_DOWN_LOAD: u32        = 0;

// PER-TIER HOTPLUG THRESHOLD DEFAULTS (KHZ)
// FIRST TIER NEVER GOES DOWN, LAST TIER NEVER GOES UP.

pub const DEFAULT_HOTPLUG_UP_FREQ: u32   = 500_000;
pub const DEFAULT_HOTPLUG_DOWN_FREQ: u32 = 200_000;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Direction {
    Down = 0,
    Up = 1,
}

impl Direction {
    pub fn from_index(i: u32) -> Option<Self> {
        match i {
            0 => Some(Self::Down),
            1 => Some(Self::Up),
            _ => None,
        }
    }
}

// HOTPLUG THRESHOLD TABLE
// ROW = ONLINE CORE COUNT - 1. ONE ROW PER POSSIBLE CORE, SIZED AT STARTUP.

pub struct HotplugFreqTable {
    tiers: Vec<[AtomicU32; 2]>,
}

impl HotplugFreqTable {
    pub fn with_defaults(nr_cpus: usize) -> Self {
        let nr = nr_cpus.max(1);
        let tiers = (0..nr)
            .map(|tier| {
                let down = if tier == 0 { 0 } else { DEFAULT_HOTPLUG_DOWN_FREQ };
                let up = if tier + 1 == nr { 0 } else { DEFAULT_HOTPLUG_UP_FREQ };
                [AtomicU32::new(down), AtomicU32::new(up)]
            })
            .collect();
        Self { tiers }
    }

    pub fn tiers(&self) -> usize {
        self.tiers.len()
    }

    // OUT-OF-RANGE CORE COUNTS READ AS 0 (UP: ALWAYS PASSES, DOWN: NEVER PASSES ALONE)
    pub fn get(&self, core_count: usize, dir: Direction) -> u32 {
        core_count
            .checked_sub(1)
            .and_then(|row| self.tiers.get(row))
            .map(|t| t[dir as usize].load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn set(&self, core_count: usize, dir: Direction, freq: u32) -> bool {
        match core_count.checked_sub(1).and_then(|row| self.tiers.get(row)) {
            Some(t) => {
                t[dir as usize].store(freq, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    // ONLY TRANSITIONS THAT CAN HAPPEN ARE CONFIGURABLE
    pub fn is_exposed(&self, core_count: usize, dir: Direction) -> bool {
        let nr = self.tiers.len();
        match dir {
            Direction::Up => core_count >= 1 && core_count < nr,
            Direction::Down => core_count >= 2 && core_count <= nr,
        }
    }
}

// CONFIGURATION SURFACE KEYS

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum TunableKey {
    SamplingRate,
    HotplugEnable,
    CpuUpRate,
    CpuDownRate,
    UpLoad,
    DownLoad,
    UpSfStep,
    DownSfStep,
    ForceFreqsStep,
    OneCoreSuspend,
    MinFreqLimit,
    MaxFreqLimit,
    HotplugFreq { core_count: usize, direction: Direction },
}

const SCALAR_KEYS: [TunableKey; 12] = [
    TunableKey::SamplingRate,
    TunableKey::HotplugEnable,
    TunableKey::CpuUpRate,
    TunableKey::CpuDownRate,
    TunableKey::UpLoad,
    TunableKey::DownLoad,
    TunableKey::UpSfStep,
    TunableKey::DownSfStep,
    TunableKey::ForceFreqsStep,
    TunableKey::OneCoreSuspend,
    TunableKey::MinFreqLimit,
    TunableKey::MaxFreqLimit,
];

fn hotplug_key_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^hotplug_freq_([1-9][0-9]*)_([01])$").ok())
        .as_ref()
}

impl TunableKey {
    pub fn name(&self) -> String {
        match self {
            Self::SamplingRate => "sampling_rate".into(),
            Self::HotplugEnable => "hotplug_enable".into(),
            Self::CpuUpRate => "cpu_up_rate".into(),
            Self::CpuDownRate => "cpu_down_rate".into(),
            Self::UpLoad => "up_load".into(),
            Self::DownLoad => "down_load".into(),
            Self::UpSfStep => "up_sf_step".into(),
            Self::DownSfStep => "down_sf_step".into(),
            Self::ForceFreqsStep => "force_freqs_step".into(),
            Self::OneCoreSuspend => "onecoresuspend".into(),
            Self::MinFreqLimit => "min_freq_limit".into(),
            Self::MaxFreqLimit => "max_freq_limit".into(),
            Self::HotplugFreq { core_count, direction } => {
                format!("hotplug_freq_{}_{}", core_count, *direction as u32)
            }
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        if let Some(key) = SCALAR_KEYS.iter().find(|k| k.name() == name) {
            return Some(*key);
        }
        let caps = hotplug_key_re()?.captures(name)?;
        let core_count = caps[1].parse::<usize>().ok()?;
        let direction = Direction::from_index(caps[2].parse::<u32>().ok()?)?;
        Some(Self::HotplugFreq { core_count, direction })
    }

    pub fn range(&self) -> &'static str {
        match self {
            Self::SamplingRate => ">= 10000 (us)",
            Self::HotplugEnable | Self::OneCoreSuspend => "0|1",
            Self::CpuUpRate | Self::CpuDownRate => "1..40",
            Self::UpLoad | Self::DownLoad => "0..100",
            Self::UpSfStep | Self::DownSfStep => "0..99",
            Self::ForceFreqsStep => "0..3",
            Self::MinFreqLimit => "0..max_freq_limit",
            Self::MaxFreqLimit => "min_freq_limit..1600000",
            Self::HotplugFreq { .. } => "unsigned kHz",
        }
    }
}

// ONE TICK'S VIEW OF THE TUNABLES. EACH FIELD READ ATOMICALLY, NO CROSS-FIELD
// CONSISTENCY.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TunableSnapshot {
    pub sampling_rate_us: u32,
    pub hotplug_enable: bool,
    pub up_rate: u32,
    pub down_rate: u32,
    pub up_load: u32,
    pub down_load: u32,
    pub up_sf_step: u32,
    pub down_sf_step: u32,
    pub force_freqs_step: u32,
    pub onecoresuspend: bool,
    pub min_freq_limit: u32,
    pub max_freq_limit: u32,
}

pub struct Tunables {
    sampling_rate: AtomicU32,
    hotplug_enable: AtomicBool,
    cpu_up_rate: AtomicU32,
    cpu_down_rate: AtomicU32,
    up_load: AtomicU32,
    down_load: AtomicU32,
    up_sf_step: AtomicU32,
    down_sf_step: AtomicU32,
    force_freqs_step: AtomicU32,
    onecoresuspend: AtomicBool,
    min_freq_limit: AtomicU32,
    max_freq_limit: AtomicU32,
    hotplug_freq: HotplugFreqTable,
}

impl Tunables {
    pub fn new(nr_cpus: usize) -> Self {
        Self {
            sampling_rate: AtomicU32::new(DEFAULT_SAMPLING_RATE_US),
            hotplug_enable: AtomicBool::new(false),
            cpu_up_rate: AtomicU32::new(DEFAULT_UP_RATE),
            cpu_down_rate: AtomicU32::new(DEFAULT_DOWN_RATE),
            up_load: AtomicU32::new(DEFAULT_UP_LOAD),
            down_load: AtomicU32::new(DEFAULT_DOWN_LOAD),
            up_sf_step: AtomicU32::new(0),
            down_sf_step: AtomicU32::new(0),
            force_freqs_step: AtomicU32::new(0),
            onecoresuspend: AtomicBool::new(false),
            min_freq_limit: AtomicU32::new(0),
            max_freq_limit: AtomicU32::new(0),
            hotplug_freq: HotplugFreqTable::with_defaults(nr_cpus),
        }
    }

    pub fn snapshot(&self) -> TunableSnapshot {
        TunableSnapshot {
            sampling_rate_us: self.sampling_rate.load(Ordering::Relaxed),
            hotplug_enable: self.hotplug_enable.load(Ordering::Relaxed),
            up_rate: self.cpu_up_rate.load(Ordering::Relaxed),
            down_rate: self.cpu_down_rate.load(Ordering::Relaxed),
            up_load: self.up_load.load(Ordering::Relaxed),
            down_load: self.down_load.load(Ordering::Relaxed),
            up_sf_step: self.up_sf_step.load(Ordering::Relaxed),
            down_sf_step: self.down_sf_step.load(Ordering::Relaxed),
            force_freqs_step: self.force_freqs_step.load(Ordering::Relaxed),
            onecoresuspend: self.onecoresuspend.load(Ordering::Relaxed),
            min_freq_limit: self.min_freq_limit.load(Ordering::Relaxed),
            max_freq_limit: self.max_freq_limit.load(Ordering::Relaxed),
        }
    }

    pub fn sampling_rate_us(&self) -> u32 {
        self.sampling_rate.load(Ordering::Relaxed)
    }

    pub fn hotplug_freq(&self) -> &HotplugFreqTable {
        &self.hotplug_freq
    }

    // SEED THE GLOBAL LIMITS FROM THE FIRST POLICY'S BOUNDS (NO CLAMPING)
    pub fn seed_limits(&self, min: u32, max: u32) {
        self.min_freq_limit.store(min, Ordering::Relaxed);
        self.max_freq_limit.store(max, Ordering::Relaxed);
    }

    pub fn keys(&self) -> Vec<TunableKey> {
        let mut keys = SCALAR_KEYS.to_vec();
        for core_count in 1..=self.hotplug_freq.tiers() {
            for direction in [Direction::Down, Direction::Up] {
                if self.hotplug_freq.is_exposed(core_count, direction) {
                    keys.push(TunableKey::HotplugFreq { core_count, direction });
                }
            }
        }
        keys
    }

    pub fn show(&self, key: TunableKey) -> u32 {
        match key {
            TunableKey::SamplingRate => self.sampling_rate.load(Ordering::Relaxed),
            TunableKey::HotplugEnable => self.hotplug_enable.load(Ordering::Relaxed) as u32,
            TunableKey::CpuUpRate => self.cpu_up_rate.load(Ordering::Relaxed),
            TunableKey::CpuDownRate => self.cpu_down_rate.load(Ordering::Relaxed),
            TunableKey::UpLoad => self.up_load.load(Ordering::Relaxed),
            TunableKey::DownLoad => self.down_load.load(Ordering::Relaxed),
            TunableKey::UpSfStep => self.up_sf_step.load(Ordering::Relaxed),
            TunableKey::DownSfStep => self.down_sf_step.load(Ordering::Relaxed),
            TunableKey::ForceFreqsStep => self.force_freqs_step.load(Ordering::Relaxed),
            TunableKey::OneCoreSuspend => self.onecoresuspend.load(Ordering::Relaxed) as u32,
            TunableKey::MinFreqLimit => self.min_freq_limit.load(Ordering::Relaxed),
            TunableKey::MaxFreqLimit => self.max_freq_limit.load(Ordering::Relaxed),
            TunableKey::HotplugFreq { core_count, direction } => {
                self.hotplug_freq.get(core_count, direction)
            }
        }
    }

    pub fn show_by_name(&self, name: &str) -> Result<u32, TuningError> {
        let key = self.resolve(name)?;
        Ok(self.show(key))
    }

    pub fn store_by_name(&self, name: &str, input: &str) -> Result<u32, TuningError> {
        let key = self.resolve(name)?;
        self.store(key, input)
    }

    fn resolve(&self, name: &str) -> Result<TunableKey, TuningError> {
        match TunableKey::parse(name) {
            Some(key @ TunableKey::HotplugFreq { core_count, direction })
                if self.hotplug_freq.is_exposed(core_count, direction) => Ok(key),
            Some(TunableKey::HotplugFreq { .. }) | None => {
                Err(TuningError::UnknownKey(name.trim().to_string()))
            }
            Some(key) => Ok(key),
        }
    }

    // VALIDATE, CLAMP, STORE. RETURNS THE VALUE NOW IN EFFECT.
    // WRITING THE CURRENT VALUE IS A SUCCESSFUL NO-OP.
    pub fn store(&self, key: TunableKey, input: &str) -> Result<u32, TuningError> {
        let invalid = || TuningError::InvalidArgument {
            key: key.name(),
            input: input.trim().to_string(),
        };

        let value = match key {
            // THRESHOLDS ARE UNSIGNED KHZ, STORED VERBATIM
            TunableKey::HotplugFreq { core_count, .. } => {
                if core_count == 0 || core_count > self.hotplug_freq.tiers() {
                    return Err(TuningError::UnknownKey(key.name()));
                }
                input.trim().parse::<u32>().map_err(|_| invalid())?
            }
            _ => {
                let raw = input.trim().parse::<i64>().map_err(|_| invalid())?;
                self.clamp_scalar(key, raw)
            }
        };

        if self.show(key) == value {
            return Ok(value);
        }

        match key {
            TunableKey::SamplingRate => self.sampling_rate.store(value, Ordering::Relaxed),
            TunableKey::HotplugEnable => self.hotplug_enable.store(value != 0, Ordering::Relaxed),
            TunableKey::CpuUpRate => self.cpu_up_rate.store(value, Ordering::Relaxed),
            TunableKey::CpuDownRate => self.cpu_down_rate.store(value, Ordering::Relaxed),
            TunableKey::UpLoad => self.up_load.store(value, Ordering::Relaxed),
            TunableKey::DownLoad => self.down_load.store(value, Ordering::Relaxed),
            TunableKey::UpSfStep => self.up_sf_step.store(value, Ordering::Relaxed),
            TunableKey::DownSfStep => self.down_sf_step.store(value, Ordering::Relaxed),
            TunableKey::ForceFreqsStep => self.force_freqs_step.store(value, Ordering::Relaxed),
            TunableKey::OneCoreSuspend => self.onecoresuspend.store(value != 0, Ordering::Relaxed),
            TunableKey::MinFreqLimit => self.min_freq_limit.store(value, Ordering::Relaxed),
            TunableKey::MaxFreqLimit => self.max_freq_limit.store(value, Ordering::Relaxed),
            TunableKey::HotplugFreq { core_count, direction } => {
                self.hotplug_freq.set(core_count, direction, value);
            }
        }
        Ok(value)
    }

    fn clamp_scalar(&self, key: TunableKey, raw: i64) -> u32 {
        match key {
            TunableKey::SamplingRate => clamp_i64(raw, MIN_SAMPLING_RATE_US, u32::MAX),
            TunableKey::HotplugEnable | TunableKey::OneCoreSuspend => (raw > 0) as u32,
            TunableKey::CpuUpRate | TunableKey::CpuDownRate => clamp_i64(raw, 1, MAX_HOTPLUG_RATE),
            TunableKey::UpLoad | TunableKey::DownLoad => clamp_i64(raw, 0, MAX_LOAD),
            TunableKey::UpSfStep | TunableKey::DownSfStep => clamp_i64(raw, 0, MAX_SF_STEP),
            TunableKey::ForceFreqsStep => clamp_i64(raw, 0, MAX_FORCE_STEP),
            TunableKey::MinFreqLimit => {
                let max = self.max_freq_limit.load(Ordering::Relaxed);
                clamp_i64(raw, 0, max)
            }
            TunableKey::MaxFreqLimit => {
                // CEILING FIRST, THEN FLOOR: A SEEDED MIN ABOVE THE CEILING WINS
                let min = self.min_freq_limit.load(Ordering::Relaxed);
                clamp_i64(raw, 0, MAX_FREQ_LIMIT).max(min)
            }
            TunableKey::HotplugFreq { .. } => clamp_i64(raw, 0, u32::MAX),
        }
    }
}

fn clamp_i64(raw: i64, lo: u32, hi: u32) -> u32 {
    raw.clamp(lo as i64, hi.max(lo) as i64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_four_cores() {
        let t = HotplugFreqTable::with_defaults(4);
        assert_eq!(t.get(1, Direction::Down), 0);
        assert_eq!(t.get(1, Direction::Up), 500_000);
        assert_eq!(t.get(2, Direction::Down), 200_000);
        assert_eq!(t.get(3, Direction::Up), 500_000);
        assert_eq!(t.get(4, Direction::Down), 200_000);
        assert_eq!(t.get(4, Direction::Up), 0);
    }

    #[test]
    fn default_table_two_cores() {
        // TWO-TIER LAYOUT: {0, 500000}, {200000, 0}
        let t = HotplugFreqTable::with_defaults(2);
        assert_eq!(t.tiers(), 2);
        assert_eq!(t.get(1, Direction::Up), 500_000);
        assert_eq!(t.get(2, Direction::Down), 200_000);
        assert_eq!(t.get(2, Direction::Up), 0);
    }

    #[test]
    fn table_out_of_range_reads_zero() {
        let t = HotplugFreqTable::with_defaults(2);
        assert_eq!(t.get(0, Direction::Up), 0);
        assert_eq!(t.get(3, Direction::Down), 0);
        assert!(!t.set(3, Direction::Down, 1));
    }

    #[test]
    fn clamp_handles_inverted_bounds() {
        // MAX BELOW MIN MUST NOT PANIC
        assert_eq!(clamp_i64(50, 10, 5), 10);
        assert_eq!(clamp_i64(-7, 0, 100), 0);
        assert_eq!(clamp_i64(i64::MAX, 0, 100), 100);
    }

    #[test]
    fn hotplug_key_regex_rejects_tier_zero() {
        assert!(TunableKey::parse("hotplug_freq_0_1").is_none());
        assert!(TunableKey::parse("hotplug_freq_1_2").is_none());
        assert_eq!(
            TunableKey::parse("hotplug_freq_12_0"),
            Some(TunableKey::HotplugFreq { core_count: 12, direction: Direction::Down })
        );
    }

    #[test]
    fn threshold_store_outside_table_is_rejected() {
        let t = Tunables::new(2);
        // TIER 3 DOES NOT EXIST. WRITING ITS READ-BACK VALUE (0) MUST NOT PASS AS A NO-OP.
        let key = TunableKey::HotplugFreq { core_count: 3, direction: Direction::Down };
        assert!(matches!(t.store(key, "0"), Err(TuningError::UnknownKey(_))));
        let key = TunableKey::HotplugFreq { core_count: 0, direction: Direction::Up };
        assert!(matches!(t.store(key, "1"), Err(TuningError::UnknownKey(_))));
        // INSIDE THE TABLE: VERBATIM, NEGATIVE REJECTED
        let key = TunableKey::HotplugFreq { core_count: 1, direction: Direction::Up };
        assert_eq!(t.store(key, "750000").unwrap(), 750_000);
        assert!(matches!(t.store(key, "-1"), Err(TuningError::InvalidArgument { .. })));
    }
}
