//! The lease state machine.

use std::collections::BTreeMap;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;

use crate::command::Command;
use crate::command::Operation;
use crate::error::ApplyError;
use crate::error::Rejection;
use crate::error::SnapshotError;
use crate::lease::LeaseInfo;
use crate::lease::LeaseKey;
use crate::lease::LeaseRecord;
use crate::snapshot::Snapshot;
use crate::snapshot::SNAPSHOT_VERSION;
use crate::storage::LogConsumer;
use crate::storage::SnapshotSource;
use crate::time::LogicalTime;

/// A change in lease ownership caused by an applied command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseEvent {
    Claimed { key: LeaseKey, holder: String },
    Expired { key: LeaseKey },
}

/// Receives lease ownership changes, e.g. to mirror them into an external store.
pub trait NotifyTarget {
    fn claimed(&self, key: &LeaseKey, holder: &str);

    fn expired(&self, key: &LeaseKey);
}

/// The result of an accepted command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyResponse {
    events: Vec<LeaseEvent>,
}

impl ApplyResponse {
    fn event(event: LeaseEvent) -> Self {
        Self { events: vec![event] }
    }

    /// The ownership changes the command caused. Empty for extend and set-time.
    pub fn events(&self) -> &[LeaseEvent] {
        &self.events
    }

    /// Forward every ownership change to `target`, in order.
    pub fn notify(&self, target: &dyn NotifyTarget) {
        for event in &self.events {
            match event {
                LeaseEvent::Claimed { key, holder } => target.claimed(key, holder),
                LeaseEvent::Expired { key } => target.expired(key),
            }
        }
    }
}

/// The state guarded by [`LeaseFsm`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct LeaseState {
    entries: BTreeMap<LeaseKey, LeaseRecord>,
    global_time: LogicalTime,
}

impl LeaseState {
    /// Apply a validated command.
    ///
    /// Every check happens before the first write, so a rejected command leaves the state as it
    /// was.
    fn apply(&mut self, command: &Command) -> Result<ApplyResponse, Rejection> {
        match command.operation {
            Operation::Claim => self.claim(command),
            Operation::Extend => self.extend(command),
            Operation::Expire => self.expire(command),
            Operation::SetTime => self.set_time(command),
        }
    }

    fn claim(&mut self, command: &Command) -> Result<ApplyResponse, Rejection> {
        let key = command.key();

        if let Some(record) = self.entries.get(&key) {
            return Err(Rejection::AlreadyHeld {
                key,
                holder: record.holder.clone(),
            });
        }

        self.entries.insert(key.clone(), LeaseRecord {
            holder: command.holder.clone(),
            start: self.global_time,
            duration: command.duration,
        });

        Ok(ApplyResponse::event(LeaseEvent::Claimed {
            key,
            holder: command.holder.clone(),
        }))
    }

    fn extend(&mut self, command: &Command) -> Result<ApplyResponse, Rejection> {
        let key = command.key();
        let now = self.global_time;

        let Some(record) = self.entries.get_mut(&key) else {
            return Err(Rejection::NotHeld { key });
        };

        if record.holder != command.holder {
            return Err(Rejection::HolderMismatch {
                key,
                holder: record.holder.clone(),
                requested: command.holder.clone(),
            });
        }

        // The expiry only ever moves forward: a shorter request keeps the later expiry.
        let expiry = record.expiry().max(now + command.duration);
        record.duration = expiry.saturating_duration_since(record.start);

        Ok(ApplyResponse::default())
    }

    fn expire(&mut self, command: &Command) -> Result<ApplyResponse, Rejection> {
        let key = command.key();

        let Some(record) = self.entries.get(&key) else {
            return Err(Rejection::NotHeld { key });
        };

        let expiry = record.expiry();
        if self.global_time < expiry {
            return Err(Rejection::NotExpired {
                key,
                expiry,
                now: self.global_time,
            });
        }

        self.entries.remove(&key);

        Ok(ApplyResponse::event(LeaseEvent::Expired { key }))
    }

    fn set_time(&mut self, command: &Command) -> Result<ApplyResponse, Rejection> {
        if command.old_time != self.global_time {
            return Err(Rejection::ConcurrentUpdate {
                expected: command.old_time,
                actual: self.global_time,
            });
        }

        self.global_time = command.new_time;

        Ok(ApplyResponse::default())
    }
}

/// The replicated state machine of the lease manager.
///
/// It maps lease keys to their holders and keeps the global time that lease expiry is measured
/// against. It is a plain value: build one per replica with [`LeaseFsm::new`] and feed it every
/// committed log entry through [`LeaseFsm::apply`].
///
/// Reads may happen concurrently with `apply` from other threads; they always observe the state
/// between two commands, never in the middle of one.
#[derive(Debug, Default)]
pub struct LeaseFsm {
    state: RwLock<LeaseState>,
}

impl LeaseFsm {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave a half-applied command behind: all writes happen
    // after all checks. So the state behind a poisoned lock is still consistent.
    fn read_state(&self) -> RwLockReadGuard<'_, LeaseState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, LeaseState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decode, validate and apply the payload of a committed log entry.
    #[tracing::instrument(level = "trace", skip(self, data), fields(len = data.len()))]
    pub fn apply(&self, data: &[u8]) -> Result<ApplyResponse, ApplyError> {
        let command = Command::decode(data)?;
        self.apply_command(&command)
    }

    /// Validate and apply an already decoded command.
    pub fn apply_command(&self, command: &Command) -> Result<ApplyResponse, ApplyError> {
        command.validate()?;

        let res = self.write_state().apply(command);

        match &res {
            Ok(_) => tracing::debug!(%command, "applied lease command"),
            Err(e) => tracing::debug!(%command, error = %e, "rejected lease command"),
        }

        res.map_err(ApplyError::from)
    }

    /// All held leases with their expiry.
    ///
    /// `_reference_time` is accepted for callers that want to compare against it, but leases are
    /// never hidden here: only an applied expire removes a lease.
    pub fn leases(&self, _reference_time: LogicalTime) -> BTreeMap<LeaseKey, LeaseInfo> {
        let state = self.read_state();
        state.entries.iter().map(|(key, record)| (key.clone(), record.info())).collect()
    }

    /// The agreed global time.
    pub fn global_time(&self) -> LogicalTime {
        self.read_state().global_time
    }

    /// Copy the current state into a snapshot that can be persisted without holding any lock.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn snapshot(&self) -> Snapshot {
        let state = self.read_state();
        Snapshot {
            version: SNAPSHOT_VERSION,
            entries: state.entries.clone(),
            global_time: state.global_time,
        }
    }

    /// Replace the whole state with the snapshot read from `source`.
    ///
    /// The snapshot is read and decoded in full before the state is touched, so a failure leaves
    /// the previous state in place. `source` is closed in either case.
    #[tracing::instrument(level = "debug", skip(self, source))]
    pub fn restore(&self, source: &mut dyn SnapshotSource) -> Result<(), SnapshotError> {
        let decoded = Snapshot::read_from(source);

        if let Err(e) = source.close() {
            tracing::warn!(error = %e, "failed to close snapshot source");
        }

        let snapshot = decoded?;

        tracing::info!(
            entries = snapshot.entries.len(),
            global_time = %snapshot.global_time,
            "installing snapshot"
        );

        self.install(snapshot)
    }

    /// Replace the whole state with an already decoded snapshot.
    ///
    /// A snapshot of another version is refused and the state is left as it was.
    pub fn install(&self, snapshot: Snapshot) -> Result<(), SnapshotError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(snapshot.version));
        }

        let mut state = self.write_state();
        *state = LeaseState {
            entries: snapshot.entries,
            global_time: snapshot.global_time,
        };
        Ok(())
    }
}

impl LogConsumer for LeaseFsm {
    type Response = ApplyResponse;
    type Error = ApplyError;
    type Snapshot = Snapshot;

    fn apply(&self, data: &[u8]) -> Result<ApplyResponse, ApplyError> {
        LeaseFsm::apply(self, data)
    }

    fn snapshot(&self) -> Snapshot {
        LeaseFsm::snapshot(self)
    }

    fn restore(&self, source: &mut dyn SnapshotSource) -> Result<(), SnapshotError> {
        LeaseFsm::restore(self, source)
    }
}
