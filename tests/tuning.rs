// DARKNESS TUNABLE STORE TESTS
// KEY SET, CLAMPING, INVALID INPUT, NO-OP WRITES
//
// ALL TESTS USE PURE-RUST TYPES FROM darkness::tuning. RUN OFFLINE.

use darkness::error::TuningError;
use darkness::tuning::{
    Direction, TunableKey, Tunables,
    DEFAULT_SAMPLING_RATE_US, DEFAULT_UP_RATE, DEFAULT_DOWN_RATE, DEFAULT_UP_LOAD,
    MAX_FREQ_LIMIT, MIN_SAMPLING_RATE_US,
};

// === DEFAULTS ===

#[test]
fn defaults_match_documented_values() {
    let t = Tunables::new(4).snapshot();
    assert_eq!(t.sampling_rate_us, DEFAULT_SAMPLING_RATE_US);
    assert_eq!(t.sampling_rate_us, 60_000);
    assert!(!t.hotplug_enable);
    assert_eq!(t.up_rate, DEFAULT_UP_RATE);
    assert_eq!(t.down_rate, DEFAULT_DOWN_RATE);
    assert_eq!(t.up_load, DEFAULT_UP_LOAD);
    assert_eq!(t.down_load, 0);
    assert_eq!(t.up_sf_step, 0);
    assert_eq!(t.down_sf_step, 0);
    assert_eq!(t.force_freqs_step, 0);
    assert!(!t.onecoresuspend);
}

// === KEY SET ===

#[test]
fn key_listing_four_cores() {
    let t = Tunables::new(4);
    let names: Vec<String> = t.keys().iter().map(|k| k.name()).collect();
    assert!(names.contains(&"sampling_rate".to_string()));
    assert!(names.contains(&"onecoresuspend".to_string()));
    // UP FOR 1..3, DOWN FOR 2..4
    for name in ["hotplug_freq_1_1", "hotplug_freq_2_1", "hotplug_freq_3_1",
                 "hotplug_freq_2_0", "hotplug_freq_3_0", "hotplug_freq_4_0"] {
        assert!(names.contains(&name.to_string()), "missing {}", name);
    }
    assert!(!names.contains(&"hotplug_freq_1_0".to_string()));
    assert!(!names.contains(&"hotplug_freq_4_1".to_string()));
    assert_eq!(names.len(), 12 + 6);
}

#[test]
fn unknown_keys_rejected() {
    let t = Tunables::new(2);
    assert!(matches!(t.store_by_name("bogus", "1"), Err(TuningError::UnknownKey(_))));
    // TIER EXISTS BUT DIRECTION NOT EXPOSED
    assert!(matches!(t.store_by_name("hotplug_freq_2_1", "1"), Err(TuningError::UnknownKey(_))));
    assert!(matches!(t.show_by_name("hotplug_freq_3_0"), Err(TuningError::UnknownKey(_))));
}

// === CLAMPING ===

#[test]
fn sampling_rate_floor() {
    let t = Tunables::new(2);
    assert_eq!(t.store_by_name("sampling_rate", "5000").unwrap(), MIN_SAMPLING_RATE_US);
    assert_eq!(t.store_by_name("sampling_rate", "-1").unwrap(), MIN_SAMPLING_RATE_US);
    assert_eq!(t.store_by_name("sampling_rate", "80000").unwrap(), 80_000);
}

#[test]
fn rates_clamp_to_one_through_forty() {
    let t = Tunables::new(2);
    assert_eq!(t.store_by_name("cpu_up_rate", "0").unwrap(), 1);
    assert_eq!(t.store_by_name("cpu_up_rate", "41").unwrap(), 40);
    assert_eq!(t.store_by_name("cpu_down_rate", "-3").unwrap(), 1);
}

#[test]
fn booleans_normalize() {
    let t = Tunables::new(2);
    assert_eq!(t.store_by_name("hotplug_enable", "7").unwrap(), 1);
    assert_eq!(t.store_by_name("hotplug_enable", "-7").unwrap(), 0);
    assert_eq!(t.store_by_name("onecoresuspend", "1").unwrap(), 1);
    assert!(t.snapshot().onecoresuspend);
}

#[test]
fn steps_and_loads_clamp() {
    let t = Tunables::new(2);
    assert_eq!(t.store_by_name("up_sf_step", "150").unwrap(), 99);
    assert_eq!(t.store_by_name("down_sf_step", "-1").unwrap(), 0);
    assert_eq!(t.store_by_name("force_freqs_step", "9").unwrap(), 3);
    assert_eq!(t.store_by_name("up_load", "101").unwrap(), 100);
    assert_eq!(t.store_by_name("down_load", "-5").unwrap(), 0);
}

#[test]
fn freq_limits_stay_ordered() {
    let t = Tunables::new(2);
    t.seed_limits(200_000, 1_400_000);
    // MIN ABOVE MAX -> CLAMPED TO MAX
    assert_eq!(t.store_by_name("min_freq_limit", "1500000").unwrap(), 1_400_000);
    // MAX BELOW MIN -> RAISED TO MIN
    assert_eq!(t.store_by_name("max_freq_limit", "100000").unwrap(), 1_400_000);
    t.store_by_name("min_freq_limit", "300000").unwrap();
    // MAX ABOVE HARDWARE CEILING
    assert_eq!(t.store_by_name("max_freq_limit", "9999999").unwrap(), MAX_FREQ_LIMIT);
    let s = t.snapshot();
    assert!(s.min_freq_limit <= s.max_freq_limit);
}

// === INVALID INPUT ===

#[test]
fn non_numeric_input_leaves_value() {
    let t = Tunables::new(2);
    let err = t.store_by_name("up_load", "lots").unwrap_err();
    assert!(matches!(err, TuningError::InvalidArgument { .. }));
    assert_eq!(t.show_by_name("up_load").unwrap(), DEFAULT_UP_LOAD);
    assert!(t.store_by_name("hotplug_freq_1_1", "-1").is_err());
}

#[test]
fn whitespace_and_newline_accepted() {
    let t = Tunables::new(2);
    assert_eq!(t.store_by_name("up_load", " 80\n").unwrap(), 80);
    assert_eq!(t.store_by_name(" cpu_down_rate ", "3").unwrap(), 3);
}

#[test]
fn writing_current_value_is_noop() {
    let t = Tunables::new(2);
    let before = t.snapshot();
    assert_eq!(t.store_by_name("sampling_rate", "60000").unwrap(), 60_000);
    assert_eq!(t.snapshot(), before);
}

// === HOTPLUG THRESHOLDS ===

#[test]
fn hotplug_thresholds_store_verbatim() {
    let t = Tunables::new(4);
    assert_eq!(t.store_by_name("hotplug_freq_2_1", "900000").unwrap(), 900_000);
    assert_eq!(t.hotplug_freq().get(2, Direction::Up), 900_000);
    let key = TunableKey::HotplugFreq { core_count: 3, direction: Direction::Down };
    assert_eq!(t.store(key, "0").unwrap(), 0);
    assert_eq!(t.show(key), 0);
}
