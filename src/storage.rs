//! The interfaces between the state machine and the consensus layer that drives it.
//!
//! The consensus layer owns log agreement, leader election and persistence of the log. It hands
//! every committed entry to a [`LogConsumer`] exactly once and in commit order, and it moves
//! snapshot bytes around through [`SnapshotSink`] and [`SnapshotSource`].

use std::io;
use std::io::Cursor;
use std::io::Read;
use std::io::Write;

use crate::error::SnapshotError;

/// A state machine that consumes the committed entries of a replicated log.
///
/// The driver guarantees that `apply` is never called concurrently with itself on one instance.
/// `snapshot` and `restore` may be called from another thread at any time, so implementations
/// synchronize internally and take `&self` throughout.
pub trait LogConsumer: Send + Sync {
    /// What an accepted entry returns to the node that proposed it.
    type Response;

    /// Why an entry was not applied.
    type Error: std::error::Error;

    /// A point-in-time capture of the state.
    type Snapshot: PersistSnapshot;

    /// Apply the payload of one committed log entry.
    ///
    /// It must be a deterministic function of the current state and `data`: every replica reaches
    /// the same state and the same result for the same log.
    fn apply(&self, data: &[u8]) -> Result<Self::Response, Self::Error>;

    /// Capture the current state.
    fn snapshot(&self) -> Self::Snapshot;

    /// Replace the whole state with the one read from `source`.
    ///
    /// `source` is closed whether or not restoring succeeds. On failure the previous state is left
    /// untouched.
    fn restore(&self, source: &mut dyn SnapshotSource) -> Result<(), SnapshotError>;
}

/// A snapshot that can write itself to a [`SnapshotSink`].
pub trait PersistSnapshot {
    /// Write the snapshot to `sink` and finalize it.
    ///
    /// On success the sink has been closed with [`SnapshotSink::close`]. Before an error is
    /// returned the sink is cancelled with [`SnapshotSink::cancel`], even if `close` was the step
    /// that failed.
    fn persist(&self, sink: &mut dyn SnapshotSink) -> Result<(), SnapshotError>;
}

/// Where a snapshot is written to.
///
/// The artifact only becomes visible once [`SnapshotSink::close`] succeeds;
/// [`SnapshotSink::cancel`] discards whatever was written.
pub trait SnapshotSink: Write {
    /// Identifies the snapshot being written.
    fn id(&self) -> &str;

    /// Finalize the written snapshot.
    fn close(&mut self) -> io::Result<()>;

    /// Discard the written snapshot.
    fn cancel(&mut self) -> io::Result<()>;
}

/// Where a snapshot is read from.
pub trait SnapshotSource: Read {
    /// Release the underlying resource.
    fn close(&mut self) -> io::Result<()>;
}

/// An in-memory snapshot, e.g. one received in full over the network.
impl<T> SnapshotSource for Cursor<T>
where T: AsRef<[u8]>
{
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}
