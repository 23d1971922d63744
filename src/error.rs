//! Error types exposed by this crate.

use std::fmt;
use std::time::Duration;

use anyerror::AnyError;

use crate::command::Operation;
use crate::lease::LeaseKey;
use crate::time::LogicalTime;

/// A command that is malformed and can never be applied.
///
/// This indicates a bug in the client that built the command: an unsupported version, an unknown
/// operation, a field that must be set but is empty or a field that must be empty but is set.
/// Retrying the same bytes always fails the same way.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{what} not valid")]
pub struct NotValid {
    what: String,
}

impl NotValid {
    pub fn new(what: impl ToString) -> Self {
        Self { what: what.to_string() }
    }

    /// A field level violation of `operation`, such as `claim with empty holder`.
    pub(crate) fn field(operation: Operation, problem: &str) -> Self {
        Self::new(format!("{} with {}", operation, problem))
    }

    /// What was found to be not valid.
    pub fn what(&self) -> &str {
        &self.what
    }
}

/// A well-formed command that the current state does not allow.
///
/// These are expected outcomes of benign races between clients: the state machine is left
/// untouched and the caller decides whether to re-read and retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// Claim on a lease that already has an entry; claim never renews.
    #[error("lease {key} already held by {holder:?}")]
    AlreadyHeld { key: LeaseKey, holder: String },

    /// Extend or expire of a lease without an entry.
    #[error("lease {key} not held")]
    NotHeld { key: LeaseKey },

    /// Extend by someone other than the current holder.
    #[error("lease {key} held by {holder:?}, not {requested:?}")]
    HolderMismatch {
        key: LeaseKey,
        holder: String,
        requested: String,
    },

    /// Expire before the computed expiry has been reached by the global time.
    #[error("lease {key} expires at {expiry}, global time is {now}")]
    NotExpired {
        key: LeaseKey,
        expiry: LogicalTime,
        now: LogicalTime,
    },

    /// SetTime whose `old_time` is not the current global time.
    ///
    /// Another update won the race; re-read the global time and retry.
    #[error("concurrent global time update: expected {expected}, global time is {actual}")]
    ConcurrentUpdate { expected: LogicalTime, actual: LogicalTime },
}

/// The outcome of a command that was not applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApplyError {
    #[error(transparent)]
    NotValid(#[from] NotValid),

    #[error("invalid lease operation: {0}")]
    Rejected(#[from] Rejection),
}

impl ApplyError {
    /// The command is malformed.
    pub fn is_not_valid(&self) -> bool {
        matches!(self, ApplyError::NotValid(_))
    }

    /// The command is well formed but was refused by a business rule, including a clock
    /// conflict.
    pub fn is_rejected(&self) -> bool {
        matches!(self, ApplyError::Rejected(_))
    }

    /// The command was refused by a lease rule: claim on a held lease, extend or expire of a lease
    /// that is not held, held by someone else or not yet expired.
    pub fn is_lease_invalid(&self) -> bool {
        match self {
            ApplyError::Rejected(r) => !matches!(r, Rejection::ConcurrentUpdate { .. }),
            ApplyError::NotValid(_) => false,
        }
    }

    /// A SetTime lost a race against another clock update.
    pub fn is_concurrent_update(&self) -> bool {
        matches!(self, ApplyError::Rejected(Rejection::ConcurrentUpdate { .. }))
    }

    pub fn not_valid(&self) -> Option<&NotValid> {
        match self {
            ApplyError::NotValid(e) => Some(e),
            ApplyError::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            ApplyError::NotValid(_) => None,
            ApplyError::Rejected(r) => Some(r),
        }
    }
}

/// The step of snapshot handling an I/O error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorVerb {
    Read,
    Write,
    Close,
}

impl fmt::Display for ErrorVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorVerb::Read => write!(f, "reading"),
            ErrorVerb::Write => write!(f, "writing"),
            ErrorVerb::Close => write!(f, "closing"),
        }
    }
}

/// Failure to persist or restore a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to encode snapshot: {source}")]
    Encode { source: AnyError },

    #[error("failed to decode snapshot: {source}")]
    Decode { source: AnyError },

    #[error("when {verb} snapshot: {source}")]
    Io { verb: ErrorVerb, source: AnyError },

    #[error("snapshot version {0} not supported")]
    UnsupportedVersion(u32),

    #[error("snapshot contains lease {0} more than once")]
    DuplicateKey(LeaseKey),

    #[error("snapshot time {0:?} out of range")]
    TimeOutOfRange(Duration),
}

impl SnapshotError {
    pub(crate) fn encode(e: &(impl std::error::Error + 'static)) -> Self {
        SnapshotError::Encode {
            source: AnyError::new(e),
        }
    }

    pub(crate) fn decode(e: &(impl std::error::Error + 'static)) -> Self {
        SnapshotError::Decode {
            source: AnyError::new(e),
        }
    }

    pub(crate) fn io(verb: ErrorVerb, e: &std::io::Error) -> Self {
        SnapshotError::Io {
            verb,
            source: AnyError::new(e),
        }
    }
}
