// DARKNESS LINUX BACKENDS
// /proc/stat FOR TIME COUNTERS, /sys/devices/system/cpu FOR HOTPLUG AND
// CPUFREQ (USERSPACE GOVERNOR, scaling_setspeed).
//
// EVERY PATH HANGS OFF A CONFIGURABLE ROOT SO TESTS CAN POINT AT A TEMP TREE.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::PlatformError;
use crate::platform::{CoreControl, FreqDriver, Policy, Relation, TimeSource};
use crate::sample::CpuTimes;

pub const PROC_STAT: &str = "/proc/stat";
pub const CPU_ROOT: &str = "/sys/devices/system/cpu";

fn read_trimmed(path: &Path) -> Result<String, PlatformError> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| PlatformError::io(path, e))
}

fn read_u32(path: &Path) -> Result<u32, PlatformError> {
    let raw = read_trimmed(path)?;
    raw.parse::<u32>().map_err(|_| PlatformError::Parse {
        path: path.to_path_buf(),
        detail: format!("expected an integer, got {:?}", raw),
    })
}

fn write_str(path: &Path, value: &str) -> Result<(), PlatformError> {
    fs::write(path, value).map_err(|e| PlatformError::io(path, e))
}

// "0-3,6,8-9" -> [0, 1, 2, 3, 6, 8, 9]
pub fn parse_cpu_list(raw: &str) -> Result<Vec<usize>, String> {
    let mut cpus = Vec::new();
    for range in raw.trim().split(',').filter(|r| !r.is_empty()) {
        let parts: Vec<&str> = range.split('-').collect();
        match parts.as_slice() {
            [one] => cpus.push(one.parse::<usize>().map_err(|_| format!("bad cpu {:?}", one))?),
            [lo, hi] => {
                let lo = lo.parse::<usize>().map_err(|_| format!("bad range {:?}", range))?;
                let hi = hi.parse::<usize>().map_err(|_| format!("bad range {:?}", range))?;
                if hi < lo {
                    return Err(format!("inverted range {:?}", range));
                }
                cpus.extend(lo..=hi);
            }
            _ => return Err(format!("bad range {:?}", range)),
        }
    }
    Ok(cpus)
}

// --- TIME COUNTERS ---

pub struct ProcStat {
    path: PathBuf,
}

impl ProcStat {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcStat {
    fn default() -> Self {
        Self::new(PROC_STAT)
    }
}

// cpuN user nice system idle iowait irq softirq steal [guest guest_nice]
pub fn parse_stat_line(line: &str) -> Option<(usize, CpuTimes)> {
    let mut fields = line.split_whitespace();
    let cpu = fields.next()?.strip_prefix("cpu")?.parse::<usize>().ok()?;
    let mut v = [0u64; 8];
    for (i, slot) in v.iter_mut().enumerate() {
        match fields.next() {
            Some(f) => *slot = f.parse().ok()?,
            // OLD KERNELS STOP AFTER iowait
            None if i >= 5 => break,
            None => return None,
        }
    }
    Some((cpu, CpuTimes {
        user: v[0],
        nice: v[1],
        system: v[2],
        idle: v[3],
        iowait: v[4],
        irq: v[5],
        softirq: v[6],
        steal: v[7],
    }))
}

impl TimeSource for ProcStat {
    fn read(&self, cpu: usize) -> Result<CpuTimes, PlatformError> {
        let raw = fs::read_to_string(&self.path).map_err(|e| PlatformError::io(&self.path, e))?;
        raw.lines()
            .filter_map(parse_stat_line)
            .find(|&(c, _)| c == cpu)
            .map(|(_, t)| t)
            .ok_or(PlatformError::NoData(cpu))
    }
}

// --- CPU HOTPLUG ---

pub struct SysfsCores {
    root: PathBuf,
    possible: usize,
}

impl SysfsCores {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, PlatformError> {
        let root = root.into();
        let path = root.join("possible");
        let raw = read_trimmed(&path)?;
        let cpus = parse_cpu_list(&raw)
            .map_err(|detail| PlatformError::Parse { path: path.clone(), detail })?;
        let possible = cpus.iter().max().map(|&c| c + 1).unwrap_or(1);
        Ok(Self { root, possible })
    }

    fn online_path(&self, cpu: usize) -> PathBuf {
        self.root.join(format!("cpu{}", cpu)).join("online")
    }

    fn set_online(&self, cpu: usize, online: bool) -> Result<(), PlatformError> {
        let path = self.online_path(cpu);
        if !path.exists() {
            let action = if online { "online" } else { "offline" };
            return Err(PlatformError::Unsupported { cpu, action });
        }
        write_str(&path, if online { "1" } else { "0" })
    }
}

impl CoreControl for SysfsCores {
    fn possible(&self) -> usize {
        self.possible
    }

    // NO online FILE (TYPICALLY CPU0): ALWAYS ONLINE
    fn is_online(&self, cpu: usize) -> bool {
        if cpu >= self.possible {
            return false;
        }
        match fs::read_to_string(self.online_path(cpu)) {
            Ok(s) => s.trim() == "1",
            Err(_) => self.root.join(format!("cpu{}", cpu)).is_dir(),
        }
    }

    fn bring_online(&self, cpu: usize) -> Result<(), PlatformError> {
        self.set_online(cpu, true)
    }

    fn take_offline(&self, cpu: usize) -> Result<(), PlatformError> {
        self.set_online(cpu, false)
    }
}

// --- CPUFREQ ---

/// Picks the available frequency for `target` inside `[min, max]`.
/// With no frequency table the target passes through.
pub fn resolve_frequency(available: &[u32], target: u32, relation: Relation, min: u32, max: u32) -> u32 {
    let mut inside: Vec<u32> = available.iter().copied().filter(|&f| f >= min && f <= max).collect();
    if inside.is_empty() {
        return target;
    }
    inside.sort_unstable();
    match relation {
        Relation::Low => inside.iter().copied().find(|&f| f >= target).unwrap_or(inside[inside.len() - 1]),
        Relation::High => inside.iter().rev().copied().find(|&f| f <= target).unwrap_or(inside[0]),
    }
}

pub struct SysfsFreq {
    root: PathBuf,
}

impl SysfsFreq {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn cpufreq(&self, cpu: usize) -> PathBuf {
        cpufreq_dir(&self.root, cpu)
    }

    fn available(&self, cpu: usize) -> Vec<u32> {
        let path = self.cpufreq(cpu).join("scaling_available_frequencies");
        match fs::read_to_string(&path) {
            Ok(raw) => raw.split_whitespace().filter_map(|f| f.parse().ok()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn resolve(&self, policy: &Policy, target: u32, relation: Relation) -> u32 {
        resolve_frequency(&self.available(policy.cpu()), target, relation, policy.min(), policy.max())
    }
}

impl FreqDriver for SysfsFreq {
    fn apply(&self, policy: &Policy, target: u32, relation: Relation) -> Result<u32, PlatformError> {
        let freq = self.resolve(policy, target, relation);
        let path = self.cpufreq(policy.cpu()).join("scaling_setspeed");
        write_str(&path, &freq.to_string())?;
        Ok(freq)
    }
}

pub fn cpufreq_dir(root: &Path, cpu: usize) -> PathBuf {
    root.join(format!("cpu{}", cpu)).join("cpufreq")
}

/// Current (min, max) bounds of the frequency domain owning `cpu`.
pub fn read_limits(root: &Path, cpu: usize) -> Result<(u32, u32), PlatformError> {
    let dir = cpufreq_dir(root, cpu);
    Ok((read_u32(&dir.join("scaling_min_freq"))?, read_u32(&dir.join("scaling_max_freq"))?))
}

pub fn discover_policy(root: &Path, cpu: usize) -> Result<Policy, PlatformError> {
    let (min, max) = read_limits(root, cpu)?;
    let cur = read_u32(&cpufreq_dir(root, cpu).join("scaling_cur_freq"))?;
    Ok(Policy::new(cpu, min, max, cur))
}

pub fn read_governor(root: &Path, cpu: usize) -> Result<String, PlatformError> {
    read_trimmed(&cpufreq_dir(root, cpu).join("scaling_governor"))
}

pub fn set_governor(root: &Path, cpu: usize, name: &str) -> Result<(), PlatformError> {
    write_str(&cpufreq_dir(root, cpu).join("scaling_governor"), name)
}

// --- DRY RUN ---
// DECISIONS ARE LOGGED, NOTHING IS WRITTEN.

pub struct DryRunFreq {
    inner: SysfsFreq,
}

impl DryRunFreq {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { inner: SysfsFreq::new(root) }
    }
}

impl FreqDriver for DryRunFreq {
    fn apply(&self, policy: &Policy, target: u32, relation: Relation) -> Result<u32, PlatformError> {
        let freq = self.inner.resolve(policy, target, relation);
        debug!("DRY RUN cpu{}: would set {} kHz", policy.cpu(), freq);
        Ok(freq)
    }
}

pub struct DryRunCores {
    inner: SysfsCores,
}

impl DryRunCores {
    pub fn new(inner: SysfsCores) -> Self {
        Self { inner }
    }
}

impl CoreControl for DryRunCores {
    fn possible(&self) -> usize {
        self.inner.possible()
    }

    fn is_online(&self, cpu: usize) -> bool {
        self.inner.is_online(cpu)
    }

    fn bring_online(&self, cpu: usize) -> Result<(), PlatformError> {
        info!("DRY RUN: would bring cpu{} online", cpu);
        Ok(())
    }

    fn take_offline(&self, cpu: usize) -> Result<(), PlatformError> {
        info!("DRY RUN: would take cpu{} offline", cpu);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_list_ranges() {
        assert_eq!(parse_cpu_list("0-3").unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(parse_cpu_list("0,2-3\n").unwrap(), vec![0, 2, 3]);
        assert!(parse_cpu_list("3-1").is_err());
        assert!(parse_cpu_list("a").is_err());
    }

    #[test]
    fn stat_line_parses_per_cpu_only() {
        assert!(parse_stat_line("cpu  10 20 30 40 50 60 70 80 0 0").is_none());
        let (cpu, t) = parse_stat_line("cpu2 1 2 3 4 5 6 7 8 0 0").unwrap();
        assert_eq!(cpu, 2);
        assert_eq!(t.user, 1);
        assert_eq!(t.steal, 8);
        assert!(parse_stat_line("intr 1 2 3").is_none());
    }

    #[test]
    fn stat_line_short_form() {
        let (_, t) = parse_stat_line("cpu0 1 2 3 4 5").unwrap();
        assert_eq!(t.iowait, 5);
        assert_eq!(t.irq, 0);
        assert!(parse_stat_line("cpu0 1 2 3").is_none());
    }

    #[test]
    fn resolve_relations() {
        let avail = [200_000, 500_000, 800_000, 1_200_000];
        assert_eq!(resolve_frequency(&avail, 600_000, Relation::Low, 0, 2_000_000), 800_000);
        assert_eq!(resolve_frequency(&avail, 600_000, Relation::High, 0, 2_000_000), 500_000);
        // NOTHING AT OR ABOVE -> HIGHEST INSIDE BOUNDS
        assert_eq!(resolve_frequency(&avail, 1_000_000, Relation::Low, 0, 900_000), 800_000);
        // NOTHING AT OR BELOW -> LOWEST INSIDE BOUNDS
        assert_eq!(resolve_frequency(&avail, 100_000, Relation::High, 0, 2_000_000), 200_000);
        assert_eq!(resolve_frequency(&[], 700_000, Relation::Low, 0, 2_000_000), 700_000);
    }
}
