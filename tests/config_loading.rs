use std::io::Write;

use tempfile::{NamedTempFile, TempDir};
use vblank_pacer::config::Config;
use vblank_pacer::latency::TechnologyKind;
use vblank_pacer::sync::PacingMode;

#[test]
fn test_full_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[pacing]
mode = "scanline_sync"
target_fps = 120.0
divisor = 2
scanline_bias = -35.5
model_refresh_interval_ms = 500
max_wait_ms = 250
overhead_smoothing = 0.05

[sampler]
poll_interval_us = 500
trusted_query_factor = 3.0
correction_gain = 0.5

[latency]
technology = "xell"
low_latency_mode = true
boost_mode = false
use_markers = false
target_fps = 118.0

[logging]
level = "debug"
metrics = false
"#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.pacing.mode, PacingMode::ScanlineSync);
    assert_eq!(config.pacing.divisor, 2);
    assert_eq!(config.pacing.scanline_bias, -35.5);
    assert_eq!(config.pacing.max_wait_ms, 250);
    assert_eq!(config.sampler.poll_interval_us, 500);
    assert_eq!(config.sampler.correction_gain, 0.5);
    assert_eq!(config.latency.technology, TechnologyKind::Xell);
    assert!(!config.latency.use_markers);
    assert_eq!(config.latency.target_fps, 118.0);
    assert_eq!(config.logging.level, "debug");
    assert!(!config.logging.metrics);
}

#[test]
fn test_saved_defaults_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vblank-pacer.toml");
    std::fs::write(&path, toml::to_string(&Config::default_config()).unwrap()).unwrap();

    let config = Config::load(&path).unwrap();
    let defaults = Config::default_config();
    assert_eq!(config.pacing.mode, defaults.pacing.mode);
    assert_eq!(config.pacing.target_fps, defaults.pacing.target_fps);
    assert_eq!(config.sampler.poll_interval_us, defaults.sampler.poll_interval_us);
    assert_eq!(config.latency, defaults.latency);
}

#[test]
fn test_empty_file_is_all_defaults() {
    let file = NamedTempFile::new().unwrap();
    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.pacing.mode, PacingMode::ScanlineSync);
    assert_eq!(config.latency.technology, TechnologyKind::None);
    assert!(config.validate().is_ok());
}

#[test]
fn test_unknown_mode_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[pacing]\nmode = \"turbo\"").unwrap();
    assert!(Config::load(file.path()).is_err());
}

#[test]
fn test_cli_overrides_win() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[pacing]\ndivisor = 3\ntarget_fps = 30.0").unwrap();

    let config = Config::load(file.path())
        .unwrap()
        .with_overrides(Some(PacingMode::SimpleFps), Some(90.0), None, None);
    assert_eq!(config.pacing.mode, PacingMode::SimpleFps);
    assert_eq!(config.pacing.divisor, 3);
    assert_eq!(config.pacing.target_fps, 90.0);
}
