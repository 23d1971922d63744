//! Point-in-time capture of the lease table and the global clock, for log compaction.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::io::Read;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ErrorVerb;
use crate::error::SnapshotError;
use crate::lease::LeaseKey;
use crate::lease::LeaseRecord;
use crate::storage::PersistSnapshot;
use crate::storage::SnapshotSink;
use crate::time::duration_to_nanos;
use crate::time::LogicalTime;

/// The only snapshot version this state machine writes and reads.
pub const SNAPSHOT_VERSION: u32 = 1;

/// The complete state of a [`LeaseFsm`](crate::LeaseFsm) at one position in the log.
///
/// It owns its data, so it can be encoded while the state machine keeps applying entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub version: u32,
    pub entries: BTreeMap<LeaseKey, LeaseRecord>,
    pub global_time: LogicalTime,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            entries: BTreeMap::new(),
            global_time: LogicalTime::EPOCH,
        }
    }
}

/// The encoded form of a [`Snapshot`].
///
/// Entries are a list sorted by key so that the document is readable and encoding the same state
/// twice yields the same bytes.
///
/// Times are offsets from the logical epoch, not wall clock instants. They and the durations are
/// written as `{"secs": .., "nanos": ..}`, exact to the nanosecond.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SnapshotDocument {
    version: u32,
    entries: Vec<SnapshotEntry>,
    global_time: Duration,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SnapshotEntry {
    namespace: String,
    model_uuid: String,
    lease: String,
    holder: String,
    start: Duration,
    duration: Duration,
}

impl From<&Snapshot> for SnapshotDocument {
    fn from(snapshot: &Snapshot) -> Self {
        let entries = snapshot
            .entries
            .iter()
            .map(|(key, record)| SnapshotEntry {
                namespace: key.namespace.clone(),
                model_uuid: key.model_uuid.clone(),
                lease: key.lease.clone(),
                holder: record.holder.clone(),
                start: record.start.since_epoch(),
                duration: record.duration,
            })
            .collect();

        Self {
            version: snapshot.version,
            entries,
            global_time: snapshot.global_time.since_epoch(),
        }
    }
}

/// A logical time, or a duration, that fits in `u64` nanoseconds.
fn in_range(d: Duration) -> Result<Duration, SnapshotError> {
    match duration_to_nanos(d) {
        Some(_) => Ok(d),
        None => Err(SnapshotError::TimeOutOfRange(d)),
    }
}

impl TryFrom<SnapshotDocument> for Snapshot {
    type Error = SnapshotError;

    fn try_from(doc: SnapshotDocument) -> Result<Self, Self::Error> {
        if doc.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(doc.version));
        }

        let mut entries = BTreeMap::new();
        for e in doc.entries {
            let key = LeaseKey::new(e.namespace, e.model_uuid, e.lease);
            match entries.entry(key) {
                Entry::Occupied(o) => return Err(SnapshotError::DuplicateKey(o.key().clone())),
                Entry::Vacant(v) => {
                    v.insert(LeaseRecord {
                        holder: e.holder,
                        start: LogicalTime::from_epoch(in_range(e.start)?),
                        duration: in_range(e.duration)?,
                    });
                }
            }
        }

        Ok(Self {
            version: doc.version,
            entries,
            global_time: LogicalTime::from_epoch(in_range(doc.global_time)?),
        })
    }
}

impl Snapshot {
    /// Encode as a pretty-printed JSON document.
    pub fn encode(&self) -> Result<Vec<u8>, SnapshotError> {
        serde_json::to_vec_pretty(&SnapshotDocument::from(self)).map_err(|e| SnapshotError::encode(&e))
    }

    pub fn decode(data: &[u8]) -> Result<Self, SnapshotError> {
        let doc: SnapshotDocument = serde_json::from_slice(data).map_err(|e| SnapshotError::decode(&e))?;
        Snapshot::try_from(doc)
    }

    /// Read a whole encoded snapshot from `reader` and decode it.
    pub fn read_from<R>(reader: &mut R) -> Result<Self, SnapshotError>
    where R: Read + ?Sized {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).map_err(|e| SnapshotError::io(ErrorVerb::Read, &e))?;
        Self::decode(&data)
    }

    fn write_to(&self, sink: &mut dyn SnapshotSink) -> Result<(), SnapshotError> {
        let data = self.encode()?;
        sink.write_all(&data).map_err(|e| SnapshotError::io(ErrorVerb::Write, &e))?;
        sink.flush().map_err(|e| SnapshotError::io(ErrorVerb::Write, &e))?;
        sink.close().map_err(|e| SnapshotError::io(ErrorVerb::Close, &e))
    }
}

impl PersistSnapshot for Snapshot {
    #[tracing::instrument(level = "debug", skip_all, fields(sink = %sink.id(), entries = self.entries.len()))]
    fn persist(&self, sink: &mut dyn SnapshotSink) -> Result<(), SnapshotError> {
        let res = self.write_to(sink);

        if let Err(e) = &res {
            tracing::warn!(error = %e, "cancelling snapshot sink");
            if let Err(cancel_err) = sink.cancel() {
                tracing::error!(error = %cancel_err, "failed to cancel snapshot sink");
            }
        }

        res
    }
}
