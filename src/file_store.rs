//! A snapshot store that keeps snapshots as files in one directory.
//!
//! A snapshot is written to `<id>.json.tmp` and renamed to `<id>.json` when its sink is closed, so
//! a reader never sees a partially written snapshot. Ids are zero padded sequence numbers: the
//! lexical order of the ids is the order the snapshots were created in.

use std::fs;
use std::fs::File;
use std::io;
use std::io::BufWriter;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::config::Config;
use crate::storage::SnapshotSink;
use crate::storage::SnapshotSource;

const SNAPSHOT_EXT: &str = "json";
const TMP_EXT: &str = "json.tmp";

/// Keeps finalized snapshots in a directory and removes all but the newest `retain` of them.
#[derive(Debug)]
pub struct FileSnapshotStore {
    dir: PathBuf,
    retain: usize,
    next_seq: AtomicU64,
}

impl FileSnapshotStore {
    /// Open the store configured by `config`, creating its directory if needed.
    pub fn open(config: &Config) -> io::Result<Self> {
        Self::new(&config.snapshot_dir, config.snapshot_retain)
    }

    /// Open the store in `dir`, keeping the newest `retain` snapshots.
    ///
    /// `retain` must be at least 1.
    pub fn new(dir: impl AsRef<Path>, retain: usize) -> io::Result<Self> {
        if retain == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "snapshot retain must be > 0",
            ));
        }

        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        // Leftovers of sinks that were neither closed nor cancelled, e.g. after a crash.
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if file_name(&path).is_some_and(|n| n.ends_with(TMP_EXT)) {
                tracing::info!(path = %path.display(), "removing unfinished snapshot");
                fs::remove_file(&path)?;
            }
        }

        let last = list_snapshots(&dir)?.first().map(|(seq, _)| *seq).unwrap_or(0);

        Ok(Self {
            dir,
            retain,
            next_seq: AtomicU64::new(last.saturating_add(1)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Start writing a new snapshot.
    pub fn create(&self) -> io::Result<FileSnapshotSink> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("{:020}", seq);

        let tmp_path = self.dir.join(format!("{}.{}", id, TMP_EXT));
        let final_path = self.dir.join(format!("{}.{}", id, SNAPSHOT_EXT));
        let file = File::create(&tmp_path)?;

        tracing::debug!(id = %id, "creating snapshot");

        Ok(FileSnapshotSink {
            id,
            tmp_path,
            final_path,
            dir: self.dir.clone(),
            retain: self.retain,
            writer: Some(BufWriter::new(file)),
        })
    }

    /// Ids of finalized snapshots, newest first.
    ///
    /// Files in the directory that are not named after a sequence number are not snapshots and
    /// are left alone.
    pub fn list(&self) -> io::Result<Vec<String>> {
        let snapshots = list_snapshots(&self.dir)?;
        Ok(snapshots.into_iter().map(|(_, id)| id).collect())
    }

    pub fn open_snapshot(&self, id: &str) -> io::Result<FileSnapshotSource> {
        let path = self.dir.join(format!("{}.{}", id, SNAPSHOT_EXT));
        let file = File::open(path)?;
        Ok(FileSnapshotSource { file: Some(file) })
    }

    /// Open the newest finalized snapshot, if there is one.
    pub fn latest(&self) -> io::Result<Option<(String, FileSnapshotSource)>> {
        let Some(id) = self.list()?.into_iter().next() else {
            return Ok(None);
        };
        let source = self.open_snapshot(&id)?;
        Ok(Some((id, source)))
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// Sequence numbers and ids of the finalized snapshots in `dir`, newest first.
fn list_snapshots(dir: &Path) -> io::Result<Vec<(u64, String)>> {
    let suffix = format!(".{}", SNAPSHOT_EXT);

    let mut snapshots = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(id) = file_name(&path).and_then(|n| n.strip_suffix(&suffix)) else {
            continue;
        };
        match id.parse::<u64>() {
            Ok(seq) => snapshots.push((seq, id.to_string())),
            Err(_) => tracing::debug!(path = %path.display(), "ignoring non-snapshot file"),
        }
    }

    snapshots.sort_unstable_by(|a, b| b.0.cmp(&a.0));
    Ok(snapshots)
}

/// Remove all but the newest `retain` snapshots.
fn reap(dir: &Path, retain: usize) -> io::Result<()> {
    for (_, id) in list_snapshots(dir)?.into_iter().skip(retain) {
        tracing::debug!(id = %id, "removing old snapshot");
        fs::remove_file(dir.join(format!("{}.{}", id, SNAPSHOT_EXT)))?;
    }
    Ok(())
}

/// A snapshot being written by a [`FileSnapshotStore`].
///
/// Dropping a sink that was neither closed nor cancelled cancels it.
#[derive(Debug)]
pub struct FileSnapshotSink {
    id: String,
    tmp_path: PathBuf,
    final_path: PathBuf,
    dir: PathBuf,
    retain: usize,

    /// `None` once closed or cancelled.
    writer: Option<BufWriter<File>>,
}

impl FileSnapshotSink {
    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::other(format!("snapshot {} is already finished", self.id)))
    }
}

impl Write for FileSnapshotSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer()?.flush()
    }
}

impl SnapshotSink for FileSnapshotSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn close(&mut self) -> io::Result<()> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| io::Error::other(format!("snapshot {} is already finished", self.id)))?;

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.tmp_path, &self.final_path)?;
        tracing::info!(id = %self.id, "snapshot finalized");

        // The new snapshot is already in place; failing to remove old ones does not undo that.
        if let Err(e) = reap(&self.dir, self.retain) {
            tracing::warn!(error = %e, "failed to remove old snapshots");
        }
        Ok(())
    }

    fn cancel(&mut self) -> io::Result<()> {
        self.writer = None;
        match fs::remove_file(&self.tmp_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => {
                tracing::info!(id = %self.id, "snapshot cancelled");
                Ok(())
            }
        }
    }
}

impl Drop for FileSnapshotSink {
    fn drop(&mut self) {
        if self.writer.is_some() {
            if let Err(e) = self.cancel() {
                tracing::warn!(id = %self.id, error = %e, "failed to cancel dropped snapshot");
            }
        }
    }
}

/// A finalized snapshot opened for reading.
#[derive(Debug)]
pub struct FileSnapshotSource {
    /// `None` once closed.
    file: Option<File>,
}

impl Read for FileSnapshotSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(f) => f.read(buf),
            None => Err(io::Error::other("snapshot source is closed")),
        }
    }
}

impl SnapshotSource for FileSnapshotSource {
    fn close(&mut self) -> io::Result<()> {
        self.file = None;
        Ok(())
    }
}
