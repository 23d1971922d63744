//! Runtime configuration of a lease state machine replica.

use std::path::PathBuf;

use anyerror::AnyError;
use clap::Parser;
use serde::Deserialize;
use serde::Serialize;

use crate::config::error::ConfigError;

/// The runtime configuration for a replica's snapshot storage.
///
/// The state machine itself has nothing to configure: every replica must apply the log the same
/// way. What varies per node is where compacted snapshots are kept and how many are retained.
///
/// Every field can be given as a command line flag or an environment variable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Parser)]
pub struct Config {
    /// The directory that snapshots are written to and restored from
    #[clap(long, env = "RAFTLEASE_SNAPSHOT_DIR", default_value = "snapshots")]
    pub snapshot_dir: PathBuf,

    /// The number of most recent snapshots to keep; older ones are removed once a new snapshot
    /// is finalized
    #[clap(long, env = "RAFTLEASE_SNAPSHOT_RETAIN", default_value = "2")]
    pub snapshot_retain: usize,
}

impl Default for Config {
    fn default() -> Self {
        <Self as Parser>::parse_from(Vec::<&'static str>::new())
    }
}

impl Config {
    /// Parse a config from command line style arguments, the first one being the program name,
    /// and validate it.
    pub fn build(args: &[&str]) -> Result<Config, ConfigError> {
        let config = <Self as Parser>::try_parse_from(args).map_err(|e| ConfigError::ParseError {
            source: AnyError::new(&e),
            args: args.iter().map(|x| x.to_string()).collect(),
        })?;
        config.validate()
    }

    /// Validate the state of this config.
    pub fn validate(self) -> Result<Config, ConfigError> {
        if self.snapshot_retain == 0 {
            return Err(ConfigError::SnapshotRetainIs0);
        }

        if self.snapshot_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptySnapshotDir);
        }

        Ok(self)
    }
}
