//! The command a client submits to the replicated log to change lease state.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::de;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;

use crate::error::NotValid;
use crate::lease::LeaseKey;
use crate::time::duration_to_nanos;
use crate::time::nanos;
use crate::time::LogicalTime;

/// The only command version this state machine understands.
pub const COMMAND_VERSION: u32 = 1;

/// The state transition a [`Command`] requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Take a free lease.
    Claim,

    /// Push the expiry of a held lease forward.
    Extend,

    /// Remove a lease whose expiry has been reached.
    Expire,

    /// Advance the global clock.
    SetTime,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Claim => "claim",
            Operation::Extend => "extend",
            Operation::Expire => "expire",
            Operation::SetTime => "setTime",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = NotValid;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claim" => Ok(Operation::Claim),
            "extend" => Ok(Operation::Extend),
            "expire" => Ok(Operation::Expire),
            "setTime" => Ok(Operation::SetTime),
            _ => Err(NotValid::new(format!("operation {:?}", s))),
        }
    }
}

impl Serialize for Operation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where S: Serializer {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where D: Deserializer<'de> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// A request to change the lease table or the global clock.
///
/// A command is carried as the payload of one log entry. Only some fields are meaningful for each
/// [`Operation`]; [`Command::validate`] enforces which ones must be set and which must be left
/// zero.
///
/// The encoding omits zero-valued fields and always emits the rest in declaration order, so the
/// same command always encodes to the same bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Command {
    pub version: u32,

    pub operation: Operation,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model_uuid: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub lease: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub holder: String,

    #[serde(default, skip_serializing_if = "Duration::is_zero", with = "nanos")]
    pub duration: Duration,

    /// For SetTime, the global time the sender last observed.
    #[serde(default, skip_serializing_if = "LogicalTime::is_epoch")]
    pub old_time: LogicalTime,

    /// For SetTime, the global time to move to.
    #[serde(default, skip_serializing_if = "LogicalTime::is_epoch")]
    pub new_time: LogicalTime,
}

impl Command {
    fn new(operation: Operation) -> Self {
        Self {
            version: COMMAND_VERSION,
            operation,
            namespace: String::new(),
            model_uuid: String::new(),
            lease: String::new(),
            holder: String::new(),
            duration: Duration::ZERO,
            old_time: LogicalTime::EPOCH,
            new_time: LogicalTime::EPOCH,
        }
    }

    fn with_key(operation: Operation, key: LeaseKey) -> Self {
        Self {
            namespace: key.namespace,
            model_uuid: key.model_uuid,
            lease: key.lease,
            ..Self::new(operation)
        }
    }

    pub fn claim(key: LeaseKey, holder: impl Into<String>, duration: Duration) -> Self {
        Self {
            holder: holder.into(),
            duration,
            ..Self::with_key(Operation::Claim, key)
        }
    }

    pub fn extend(key: LeaseKey, holder: impl Into<String>, duration: Duration) -> Self {
        Self {
            holder: holder.into(),
            duration,
            ..Self::with_key(Operation::Extend, key)
        }
    }

    pub fn expire(key: LeaseKey) -> Self {
        Self::with_key(Operation::Expire, key)
    }

    pub fn set_time(old_time: LogicalTime, new_time: LogicalTime) -> Self {
        Self {
            old_time,
            new_time,
            ..Self::new(Operation::SetTime)
        }
    }

    /// The lease this command addresses. Empty for SetTime.
    pub fn key(&self) -> LeaseKey {
        LeaseKey::new(&self.namespace, &self.model_uuid, &self.lease)
    }

    /// Check that the command is well formed.
    ///
    /// The version is checked before anything else. Field checks follow the operation:
    ///
    /// | operation | must be set                                       | must be zero                    |
    /// |-----------|---------------------------------------------------|---------------------------------|
    /// | claim     | namespace, model uuid, lease, holder, duration    | old time, new time              |
    /// | extend    | namespace, model uuid, lease, holder, duration    | new time                        |
    /// | expire    | namespace, model uuid, lease                      | holder, duration, old/new time  |
    /// | setTime   | new time                                          | duration                        |
    pub fn validate(&self) -> Result<(), NotValid> {
        if self.version != COMMAND_VERSION {
            return Err(NotValid::new(format!("version {}", self.version)));
        }

        let op = self.operation;

        match op {
            Operation::Claim | Operation::Extend => {
                self.validate_key()?;
                if self.holder.is_empty() {
                    return Err(NotValid::field(op, "empty holder"));
                }
                if self.duration.is_zero() {
                    return Err(NotValid::field(op, "zero duration"));
                }
                if duration_to_nanos(self.duration).is_none() {
                    return Err(NotValid::field(op, "duration out of range"));
                }
                if op == Operation::Claim && !self.old_time.is_epoch() {
                    return Err(NotValid::field(op, "old time"));
                }
                if !self.new_time.is_epoch() {
                    return Err(NotValid::field(op, "new time"));
                }
            }
            Operation::Expire => {
                self.validate_key()?;
                if !self.holder.is_empty() {
                    return Err(NotValid::field(op, "holder"));
                }
                if !self.duration.is_zero() {
                    return Err(NotValid::field(op, "duration"));
                }
                if !self.old_time.is_epoch() {
                    return Err(NotValid::field(op, "old time"));
                }
                if !self.new_time.is_epoch() {
                    return Err(NotValid::field(op, "new time"));
                }
            }
            Operation::SetTime => {
                // An old time at the epoch is how a fresh cluster sets its first time.
                if self.new_time.is_epoch() {
                    return Err(NotValid::field(op, "zero new time"));
                }
                if !self.duration.is_zero() {
                    return Err(NotValid::field(op, "duration"));
                }
            }
        }

        Ok(())
    }

    fn validate_key(&self) -> Result<(), NotValid> {
        let op = self.operation;
        if self.namespace.is_empty() {
            return Err(NotValid::field(op, "empty namespace"));
        }
        if self.model_uuid.is_empty() {
            return Err(NotValid::field(op, "empty model UUID"));
        }
        if self.lease.is_empty() {
            return Err(NotValid::field(op, "empty lease"));
        }
        Ok(())
    }

    /// Encode into the bytes carried by a log entry.
    pub fn encode(&self) -> Result<Vec<u8>, NotValid> {
        serde_json::to_vec(self).map_err(|e| NotValid::new(format!("command encoding ({})", e)))
    }

    /// Decode the bytes of a log entry.
    ///
    /// Bytes that are not a command, or that name an unknown operation, are not valid. The result
    /// is not validated; call [`Command::validate`] before acting on it.
    pub fn decode(data: &[u8]) -> Result<Self, NotValid> {
        serde_json::from_slice(data).map_err(|e| NotValid::new(format!("command encoding ({})", e)))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operation {
            Operation::Claim | Operation::Extend => write!(
                f,
                "{}({}, holder: {}, duration: {:?})",
                self.operation,
                self.key(),
                self.holder,
                self.duration
            ),
            Operation::Expire => write!(f, "{}({})", self.operation, self.key()),
            Operation::SetTime => write!(f, "{}({} -> {})", self.operation, self.old_time, self.new_time),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use crate::command::Command;
    use crate::command::Operation;
    use crate::lease::LeaseKey;
    use crate::time::LogicalTime;

    fn key() -> LeaseKey {
        LeaseKey::new("namespace", "model", "lease")
    }

    fn now() -> LogicalTime {
        LogicalTime::EPOCH + Duration::from_secs(1_000)
    }

    #[test]
    fn test_validate_expire() {
        let mut command = Command::expire(key());
        assert_eq!(Ok(()), command.validate());

        command.holder = "me".to_string();
        assert_eq!("expire with holder not valid", command.validate().unwrap_err().to_string());

        command.holder = "".to_string();
        command.model_uuid = "".to_string();
        assert_eq!(
            "expire with empty model UUID not valid",
            command.validate().unwrap_err().to_string()
        );

        let mut command = Command::expire(key());
        command.duration = Duration::from_secs(1);
        assert_eq!("expire with duration not valid", command.validate().unwrap_err().to_string());

        let mut command = Command::expire(key());
        command.old_time = now();
        assert_eq!("expire with old time not valid", command.validate().unwrap_err().to_string());

        let mut command = Command::expire(key());
        command.new_time = now();
        assert_eq!("expire with new time not valid", command.validate().unwrap_err().to_string());
    }

    #[test]
    fn test_validate_claim() {
        let mut command = Command::claim(key(), "you", Duration::from_secs(1));
        assert_eq!(Ok(()), command.validate());

        command.old_time = now();
        assert_eq!("claim with old time not valid", command.validate().unwrap_err().to_string());

        command.old_time = LogicalTime::EPOCH;
        command.new_time = now();
        assert_eq!("claim with new time not valid", command.validate().unwrap_err().to_string());

        command.new_time = LogicalTime::EPOCH;
        command.lease = "".to_string();
        assert_eq!("claim with empty lease not valid", command.validate().unwrap_err().to_string());

        let command = Command::claim(key(), "", Duration::from_secs(1));
        assert_eq!("claim with empty holder not valid", command.validate().unwrap_err().to_string());

        let command = Command::claim(LeaseKey::new("", "model", "lease"), "you", Duration::from_secs(1));
        assert_eq!(
            "claim with empty namespace not valid",
            command.validate().unwrap_err().to_string()
        );

        let mut command = Command::claim(key(), "you", Duration::ZERO);
        assert_eq!("claim with zero duration not valid", command.validate().unwrap_err().to_string());

        command.duration = Duration::MAX;
        assert_eq!(
            "claim with duration out of range not valid",
            command.validate().unwrap_err().to_string()
        );
    }

    #[test]
    fn test_validate_extend() {
        let mut command = Command::extend(key(), "you", Duration::from_secs(1));
        assert_eq!(Ok(()), command.validate());

        // Unlike claim, extend may carry the old time its sender observed.
        command.old_time = now();
        assert_eq!(Ok(()), command.validate());

        command.new_time = now();
        assert_eq!("extend with new time not valid", command.validate().unwrap_err().to_string());

        command.new_time = LogicalTime::EPOCH;
        command.namespace = "".to_string();
        assert_eq!(
            "extend with empty namespace not valid",
            command.validate().unwrap_err().to_string()
        );

        let command = Command::extend(key(), "", Duration::from_secs(1));
        assert_eq!("extend with empty holder not valid", command.validate().unwrap_err().to_string());
    }

    #[test]
    fn test_validate_set_time() {
        let mut command = Command::set_time(now(), now());
        assert_eq!(Ok(()), command.validate());

        command.duration = Duration::from_secs(60);
        assert_eq!("setTime with duration not valid", command.validate().unwrap_err().to_string());

        command.duration = Duration::ZERO;
        command.new_time = LogicalTime::EPOCH;
        assert_eq!(
            "setTime with zero new time not valid",
            command.validate().unwrap_err().to_string()
        );

        // Starting from the epoch is allowed.
        let command = Command::set_time(LogicalTime::EPOCH, now());
        assert_eq!(Ok(()), command.validate());
    }

    #[test]
    fn test_validate_version_first() {
        let mut command = Command::expire(key());
        command.version = 300;
        command.holder = "me".to_string();
        assert_eq!("version 300 not valid", command.validate().unwrap_err().to_string());
    }

    #[test]
    fn test_encoding_is_stable() -> anyhow::Result<()> {
        let command = Command::claim(key(), "me", Duration::from_secs(1));
        let data = command.encode()?;

        assert_eq!(
            r#"{"version":1,"operation":"claim","namespace":"namespace","model-uuid":"model","lease":"lease","holder":"me","duration":1000000000}"#,
            String::from_utf8(data.clone())?
        );
        assert_eq!(data, command.clone().encode()?);
        assert_eq!(command, Command::decode(&data)?);

        let set_time = Command::set_time(LogicalTime::EPOCH, LogicalTime::from_nanos(5));
        assert_eq!(
            r#"{"version":1,"operation":"setTime","new-time":5}"#,
            String::from_utf8(set_time.encode()?)?
        );
        Ok(())
    }

    #[test]
    fn test_decode_unknown_operation() {
        let err = Command::decode(br#"{"version":1,"operation":"libera-me"}"#).unwrap_err();
        assert!(err.what().contains(r#"operation "libera-me" not valid"#), "got: {}", err);

        assert!(Command::decode(b"not a command").is_err());
    }

    #[test]
    fn test_operation_names() {
        for op in [Operation::Claim, Operation::Extend, Operation::Expire, Operation::SetTime] {
            assert_eq!(Ok(op), op.as_str().parse::<Operation>());
        }
    }
}
