use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::time::nanos;
use crate::time::LogicalTime;

/// Identifies a lease: a named resource within a namespace of a model.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LeaseKey {
    pub namespace: String,
    pub model_uuid: String,
    pub lease: String,
}

impl LeaseKey {
    pub fn new(namespace: impl Into<String>, model_uuid: impl Into<String>, lease: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            model_uuid: model_uuid.into(),
            lease: lease.into(),
        }
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.model_uuid, self.lease)
    }
}

/// What the state machine stores for a held lease.
///
/// The expiry is not stored: it is always derived as `start + duration`, so a record stays
/// meaningful to any reader regardless of the instant it compares against.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(Serialize, Deserialize)]
pub struct LeaseRecord {
    pub holder: String,

    /// Global time at which the lease was claimed.
    pub start: LogicalTime,

    #[serde(with = "nanos")]
    pub duration: Duration,
}

impl LeaseRecord {
    pub fn expiry(&self) -> LogicalTime {
        self.start + self.duration
    }

    pub fn info(&self) -> LeaseInfo {
        LeaseInfo {
            holder: self.holder.clone(),
            expiry: self.expiry(),
        }
    }
}

/// Read-only view of a held lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseInfo {
    pub holder: String,
    pub expiry: LogicalTime,
}

impl fmt::Display for LeaseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{holder: {}, expiry: {}}}", self.holder, self.expiry)
    }
}
