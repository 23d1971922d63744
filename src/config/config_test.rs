use std::path::PathBuf;

use crate::config::error::ConfigError;
use crate::Config;

#[test]
fn test_config_defaults() {
    let cfg = Config::default();

    assert_eq!(PathBuf::from("snapshots"), cfg.snapshot_dir);
    assert_eq!(2, cfg.snapshot_retain);
}

#[test]
fn test_invalid_config_produces_expected_error() {
    let config = Config {
        snapshot_retain: 0,
        ..Default::default()
    };
    assert_eq!(ConfigError::SnapshotRetainIs0, config.validate().unwrap_err());

    let config = Config {
        snapshot_dir: PathBuf::new(),
        ..Default::default()
    };
    assert_eq!(ConfigError::EmptySnapshotDir, config.validate().unwrap_err());
}

#[test]
fn test_build() -> anyhow::Result<()> {
    let config = Config::build(&["foo", "--snapshot-dir=/var/lib/leases", "--snapshot-retain=5"])?;

    assert_eq!(PathBuf::from("/var/lib/leases"), config.snapshot_dir);
    assert_eq!(5, config.snapshot_retain);

    let err = Config::build(&["foo", "--snapshot-retain=0"]).unwrap_err();
    assert_eq!(ConfigError::SnapshotRetainIs0, err);

    let err = Config::build(&["foo", "--snapshot-retain=many"]).unwrap_err();
    assert!(matches!(err, ConfigError::ParseError { .. }));

    Ok(())
}
