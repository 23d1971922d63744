use std::fmt;
use std::ops::Add;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

/// A point on the cluster-wide logical clock.
///
/// It is an offset in nanoseconds from the logical epoch, which is where every state machine
/// starts. It only moves when a `SetTime` command is applied and is never read from a local
/// clock, so every replica sees the same value at the same log position.
///
/// Arithmetic saturates at the largest representable instant instead of wrapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalTime(u64);

impl LogicalTime {
    /// The instant every state machine starts at.
    pub const EPOCH: LogicalTime = LogicalTime(0);

    /// Build the instant that is `offset` after the epoch.
    pub fn from_epoch(offset: Duration) -> Self {
        Self(duration_to_nanos(offset).unwrap_or(u64::MAX))
    }

    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn since_epoch(&self) -> Duration {
        Duration::from_nanos(self.0)
    }

    pub fn is_epoch(&self) -> bool {
        self.0 == 0
    }

    pub fn saturating_add(self, d: Duration) -> Self {
        let d = duration_to_nanos(d).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(d))
    }

    /// The amount of time from `earlier` to `self`, or zero if `earlier` is later.
    pub fn saturating_duration_since(self, earlier: LogicalTime) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for LogicalTime {
    type Output = LogicalTime;

    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl fmt::Display for LogicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch+{:?}", self.since_epoch())
    }
}

/// Convert a duration to whole nanoseconds, `None` if it does not fit in a `u64`.
pub(crate) fn duration_to_nanos(d: Duration) -> Option<u64> {
    u64::try_from(d.as_nanos()).ok()
}

/// Serde adapter that encodes a [`Duration`] as integer nanoseconds.
pub(crate) mod nanos {
    use std::time::Duration;

    use serde::ser::Error;
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;

    pub(crate) fn serialize<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where S: Serializer {
        let n = super::duration_to_nanos(*d)
            .ok_or_else(|| S::Error::custom(format!("duration {:?} does not fit in u64 nanoseconds", d)))?;
        serializer.serialize_u64(n)
    }

    pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where D: Deserializer<'de> {
        let n = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(n))
    }
}
