use std::io::Read;
use std::path::Path;

use anyhow::Result;

use darkness::platform::CoreControl;
use darkness::sysfs::{self, SysfsCores};

const REQUIRED_CONFIG: [&str; 3] = [
    "CONFIG_CPU_FREQ",
    "CONFIG_CPU_FREQ_GOV_USERSPACE",
    "CONFIG_HOTPLUG_CPU",
];

fn check_kernel_config() -> bool {
    let file = match std::fs::File::open("/proc/config.gz") {
        Ok(f) => f,
        Err(_) => {
            println!("  /proc/config.gz       NOT FOUND (SKIPPED)");
            return true;
        }
    };
    let mut decoder = flate2::read::GzDecoder::new(file);
    let mut config = String::new();
    if decoder.read_to_string(&mut config).is_err() {
        println!("  /proc/config.gz       UNREADABLE (SKIPPED)");
        return true;
    }

    let mut ok = true;
    for opt in REQUIRED_CONFIG {
        let set = config.lines().any(|l| l == format!("{}=y", opt));
        if set {
            println!("  {:<32}OK", opt);
        } else {
            println!("  {:<32}NOT SET", opt);
            ok = false;
        }
    }
    ok
}

fn check_path(label: &str, path: &Path) -> bool {
    let found = path.exists();
    println!("  {:<24}{}", label, if found { "OK" } else { "MISSING" });
    found
}

pub fn run_check(cpu_root: &Path, policy_cpu: usize) -> Result<()> {
    println!("DARKNESS ENVIRONMENT CHECK");
    println!();

    let mut ok = true;
    ok &= check_path("/proc/stat", Path::new(sysfs::PROC_STAT));
    ok &= check_path("cpufreq", &sysfs::cpufreq_dir(cpu_root, policy_cpu));
    println!();

    println!("CPUFREQ (cpu{}):", policy_cpu);
    let avail = std::fs::read_to_string(
        sysfs::cpufreq_dir(cpu_root, policy_cpu).join("scaling_available_governors"),
    )
    .unwrap_or_default();
    if avail.split_whitespace().any(|g| g == "userspace") {
        println!("  userspace governor    AVAILABLE");
    } else {
        println!("  userspace governor    NOT AVAILABLE");
        ok = false;
    }
    match sysfs::read_governor(cpu_root, policy_cpu) {
        Ok(g) => println!("  active governor       {}", g),
        Err(e) => println!("  active governor       UNKNOWN ({})", e),
    }
    match sysfs::read_limits(cpu_root, policy_cpu) {
        Ok((min, max)) => println!("  limits                {}..{} kHz", min, max),
        Err(e) => {
            println!("  limits                UNREADABLE ({})", e);
            ok = false;
        }
    }
    println!();

    println!("HOTPLUG:");
    match SysfsCores::new(cpu_root) {
        Ok(cores) => {
            let possible = cores.possible();
            let pluggable = (0..possible)
                .filter(|&c| cpu_root.join(format!("cpu{}", c)).join("online").exists())
                .count();
            println!("  possible cores        {}", possible);
            println!("  online cores          {}", cores.online_count());
            println!("  hotplug-capable       {}", pluggable);
        }
        Err(e) => {
            println!("  cpu topology          UNREADABLE ({})", e);
            ok = false;
        }
    }
    println!();

    println!("KERNEL CONFIG:");
    if !check_kernel_config() {
        ok = false;
    }
    println!();

    if ok {
        println!("ALL CHECKS PASSED");
    } else {
        println!("SOME CHECKS FAILED");
        std::process::exit(1);
    }

    Ok(())
}
