// DARKNESS -- ADAPTIVE CPUFREQ + CPU HOTPLUG GOVERNOR
//
// PER-CORE LOAD FROM TIME COUNTERS DRIVES TWO DECISIONS EACH TICK:
//   FREQUENCY: LOAD-PROPORTIONAL, QUANTIZED OR PICKED FROM A STEPPED PROFILE
//   HOTPLUG:   ONE CORE UP OR DOWN AT THE BOUNDARY, RATE-LIMITED

pub mod error;
pub mod event;
pub mod freq;
pub mod governor;
pub mod hotplug;
pub mod logging;
pub mod platform;
pub mod sample;
pub mod surface;
pub mod sysfs;
pub mod tuning;

pub use error::{GovernorError, PlatformError, TuningError};
pub use governor::{Governor, Scheduling, State, TickReport};
pub use platform::{ConfigSurface, CoreControl, FreqDriver, Platform, Policy, Relation, TimeSource};
pub use tuning::{TunableKey, Tunables};
