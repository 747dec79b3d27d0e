// DARKNESS v1.5.0 -- ADAPTIVE CPUFREQ + CPU HOTPLUG GOVERNOR
//
// DECISIONS HAPPEN IN THE LIBRARY CONTROL LOOP (ONE TIMER THREAD PER POLICY CPU)
// THIS BINARY HANDLES: SYSFS WIRING, THE CONTROL DIRECTORY, LIMIT CHANGES, REPORTING

mod cli;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info, warn};

use darkness::platform::{CoreControl, FreqDriver};
use darkness::surface::ControlDir;
use darkness::sysfs::{self, DryRunCores, DryRunFreq, ProcStat, SysfsCores, SysfsFreq};
use darkness::{Governor, Platform, Policy, Scheduling, Tunables};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "darkness")]
#[command(about = "DARKNESS -- ADAPTIVE CPUFREQ + CPU HOTPLUG GOVERNOR")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    // LOG DECISIONS, NEVER WRITE CPUFREQ OR HOTPLUG FILES
    #[arg(long)]
    dry_run: bool,

    // WHERE THE TUNABLE FILES LIVE WHILE ACTIVE
    #[arg(long, default_value = "/run/darkness")]
    control_dir: PathBuf,

    // KEY=VALUE, APPLIED AFTER START (REPEATABLE)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    // CPU WHOSE CPUFREQ POLICY IS GOVERNED
    #[arg(long, default_value_t = 0)]
    policy_cpu: usize,

    // -v DEBUG, -vv TRACE
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    // DUMP FULL TICK LOG ON EXIT
    #[arg(long)]
    dump_log: bool,

    // SYSFS CPU ROOT (TESTING)
    #[arg(long, default_value = sysfs::CPU_ROOT, hide = true)]
    cpu_root: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Check kernel support and sysfs paths
    Check,
    /// List every tunable with its default and valid range
    Tunables,
}

fn main() -> Result<()> {
    let opts = Cli::parse();
    darkness::logging::init(opts.verbose)?;

    match opts.command {
        Some(Command::Check) => return cli::check::run_check(&opts.cpu_root, opts.policy_cpu),
        Some(Command::Tunables) => {
            let possible = SysfsCores::new(&opts.cpu_root).map(|c| c.possible()).unwrap_or(1);
            cli::run_tunables(possible);
            return Ok(());
        }
        None => {}
    }

    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })?;

    run(&opts)
}

// PUTS THE MACHINE BACK ON EVERY EXIT PATH, ERRORS INCLUDED
struct Session {
    root: PathBuf,
    cpu: usize,
    prev_governor: Option<String>,
    active: Option<(Arc<Governor>, Arc<Policy>)>,
}

impl Session {
    fn stop(&mut self) {
        if let Some((governor, policy)) = self.active.take() {
            if let Err(e) = governor.stop(&policy) {
                warn!("stopping control loop: {}", e);
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
        if let Some(prev) = self.prev_governor.take() {
            if let Err(e) = sysfs::set_governor(&self.root, self.cpu, &prev) {
                warn!("restoring cpufreq governor {:?}: {}", prev, e);
            }
        }
    }
}

// CHECK EVERY --set AGAINST A SCRATCH STORE BEFORE TOUCHING THE MACHINE
fn parse_sets(sets: &[String], possible: usize) -> Result<Vec<(String, String)>> {
    let scratch = Tunables::new(possible);
    sets.iter()
        .map(|kv| -> Result<(String, String)> {
            let (key, value) = kv
                .split_once('=')
                .ok_or_else(|| anyhow!("--set expects KEY=VALUE, got {:?}", kv))?;
            scratch
                .store_by_name(key, value)
                .with_context(|| format!("--set {}", kv))?;
            Ok((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn run(opts: &Cli) -> Result<()> {
    let root = &opts.cpu_root;
    let cpu = opts.policy_cpu;

    let sysfs_cores = SysfsCores::new(root).context("reading cpu topology")?;
    let possible = sysfs_cores.possible();
    let sets = parse_sets(&opts.set, possible)?;

    // HAND THE POLICY TO THE USERSPACE GOVERNOR, REMEMBER WHAT WAS THERE
    let mut session = Session { root: root.clone(), cpu, prev_governor: None, active: None };
    if !opts.dry_run {
        let prev = sysfs::read_governor(root, cpu).ok();
        sysfs::set_governor(root, cpu, "userspace")
            .context("switching cpufreq policy to the userspace governor")?;
        session.prev_governor = prev;
    }

    let freq: Arc<dyn FreqDriver> = if opts.dry_run {
        Arc::new(DryRunFreq::new(root))
    } else {
        Arc::new(SysfsFreq::new(root))
    };
    let cores: Arc<dyn CoreControl> = if opts.dry_run {
        Arc::new(DryRunCores::new(sysfs_cores))
    } else {
        Arc::new(sysfs_cores)
    };
    let surface = Arc::new(ControlDir::new(&opts.control_dir));
    let platform = Platform {
        freq,
        cores,
        times: Arc::new(ProcStat::default()),
        surface: surface.clone(),
    };

    let policy = Arc::new(
        sysfs::discover_policy(root, cpu).with_context(|| format!("reading cpufreq policy of cpu{}", cpu))?,
    );
    let governor = Arc::new(Governor::new(platform, Scheduling::Timers));

    println!("DARKNESS v1.5.0");
    println!("CPUS:            {} possible", possible);
    println!("POLICY:          cpu{} ({}..{} kHz, now {})", cpu, policy.min(), policy.max(), policy.cur());
    println!("CONTROL DIR:     {}", opts.control_dir.display());
    println!("DRY RUN:         {}", opts.dry_run);
    println!();

    governor.start(&policy)?;
    session.active = Some((governor.clone(), policy.clone()));

    for (key, value) in &sets {
        let stored = governor.tunables().store_by_name(key, value)?;
        info!("TUNABLE {} = {}", key, stored);
    }
    surface.refresh()?;

    println!("DARKNESS IS ACTIVE (CTRL+C TO EXIT)");

    let mut limits = (policy.min(), policy.max());
    while !SHUTDOWN.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_secs(1));

        surface.sync();

        match sysfs::read_limits(root, cpu) {
            Ok(now) if now != limits => {
                limits = now;
                policy.set_limits(now.0, now.1);
                governor.limits(&policy);
            }
            Ok(_) => {}
            Err(e) => debug!("{}", e),
        }
    }

    println!("DARKNESS IS SHUTTING DOWN");
    session.stop();

    if opts.dump_log {
        governor.dump_log();
    }
    governor.summary();

    drop(session);
    println!("DARKNESS OUT.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sets_validated_up_front() {
        let ok = parse_sets(&["up_load=80".into(), " cpu_up_rate = 3".into()], 4).unwrap();
        assert_eq!(ok, vec![
            ("up_load".to_string(), "80".to_string()),
            ("cpu_up_rate".to_string(), "3".to_string()),
        ]);

        assert!(parse_sets(&["bogus=1".into()], 4).is_err());
        assert!(parse_sets(&["up_load=lots".into()], 4).is_err());
        assert!(parse_sets(&["up_load".into()], 4).is_err());
        // TIER NOT EXPOSED ON TWO CORES
        assert!(parse_sets(&["hotplug_freq_2_1=1".into()], 2).is_err());
        assert!(parse_sets(&[], 2).unwrap().is_empty());
    }

    #[test]
    fn session_restores_on_error_path() {
        let dir = tempfile::tempdir().unwrap();
        let freq = dir.path().join("cpu0/cpufreq");
        std::fs::create_dir_all(&freq).unwrap();
        std::fs::write(freq.join("scaling_governor"), "userspace").unwrap();

        let attempt = || -> Result<()> {
            let _session = Session {
                root: dir.path().to_path_buf(),
                cpu: 0,
                prev_governor: Some("schedutil".into()),
                active: None,
            };
            Err(anyhow!("start failed"))
        };
        assert!(attempt().is_err());
        assert_eq!(std::fs::read_to_string(freq.join("scaling_governor")).unwrap(), "schedutil");
    }
}
