use anyerror::AnyError;

/// Error variants related to configuration.
#[derive(Debug, thiserror::Error)]
#[derive(PartialEq, Eq)]
pub enum ConfigError {
    #[error("ParseError: {source} while parsing ({args:?})")]
    ParseError { source: AnyError, args: Vec<String> },

    /// At least one snapshot has to be kept, or there is nothing to restore from.
    #[error("snapshot_retain must be > 0")]
    SnapshotRetainIs0,

    #[error("snapshot_dir must not be empty")]
    EmptySnapshotDir,
}
