//! Feed one committed log into several replicas through the [`LogConsumer`] interface and check
//! that they agree.

use std::io::Cursor;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use maplit::btreemap;
use pretty_assertions::assert_eq;
use raftlease::ApplyError;
use raftlease::ApplyResponse;
use raftlease::Command;
use raftlease::LeaseFsm;
use raftlease::LeaseInfo;
use raftlease::LeaseKey;
use raftlease::LogConsumer;
use raftlease::LogicalTime;
use raftlease::PersistSnapshot;
use raftlease::SnapshotSink;

fn at(secs: u64) -> LogicalTime {
    LogicalTime::EPOCH + Duration::from_secs(secs)
}

fn key(lease: &str) -> LeaseKey {
    LeaseKey::new("ns", "model", lease)
}

/// A committed log: the encoded payloads in commit order.
fn committed_log() -> Vec<Vec<u8>> {
    let commands = vec![
        Command::claim(key("a"), "node-1", Duration::from_secs(10)),
        Command::claim(key("b"), "node-2", Duration::from_secs(5)),
        // Lost race: b is already held.
        Command::claim(key("b"), "node-3", Duration::from_secs(5)),
        Command::set_time(at(0), at(4)),
        // Stale clock update.
        Command::set_time(at(0), at(3)),
        Command::extend(key("b"), "node-2", Duration::from_secs(5)),
        Command::set_time(at(4), at(12)),
        Command::expire(key("a")),
        Command::claim(key("a"), "node-3", Duration::from_secs(1)),
    ];

    let mut log: Vec<Vec<u8>> = commands.iter().map(|c| c.encode().unwrap()).collect();

    // A corrupt entry is rejected by every replica alike.
    log.insert(3, b"garbage".to_vec());
    log
}

/// Drive a consumer the way a consensus layer would: every entry once, in order.
fn drive<C: LogConsumer>(consumer: &C, log: &[Vec<u8>]) -> Vec<Result<C::Response, C::Error>> {
    log.iter().map(|entry| consumer.apply(entry)).collect()
}

fn outcome(res: &Result<ApplyResponse, ApplyError>) -> String {
    match res {
        Ok(_) => "ok".to_string(),
        Err(e) if e.is_not_valid() => "not valid".to_string(),
        Err(e) if e.is_concurrent_update() => "concurrent update".to_string(),
        Err(_) => "lease invalid".to_string(),
    }
}

#[derive(Default)]
struct MemSink {
    data: Vec<u8>,
    closed: bool,
}

impl std::io::Write for MemSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SnapshotSink for MemSink {
    fn id(&self) -> &str {
        "mem"
    }

    fn close(&mut self) -> std::io::Result<()> {
        self.closed = true;
        Ok(())
    }

    fn cancel(&mut self) -> std::io::Result<()> {
        self.data.clear();
        Ok(())
    }
}

fn persisted<C: LogConsumer>(consumer: &C) -> anyhow::Result<Vec<u8>> {
    let mut sink = MemSink::default();
    consumer.snapshot().persist(&mut sink)?;
    assert!(sink.closed);
    Ok(sink.data)
}

#[test]
fn test_replicas_agree() -> anyhow::Result<()> {
    let log = committed_log();

    let replicas = [LeaseFsm::new(), LeaseFsm::new(), LeaseFsm::new()];
    let results: Vec<Vec<String>> =
        replicas.iter().map(|r| drive(r, &log).iter().map(outcome).collect()).collect();

    assert_eq!(
        vec![
            "ok",
            "ok",
            "lease invalid",
            "not valid",
            "ok",
            "concurrent update",
            "ok",
            "ok",
            "ok",
            "ok",
        ],
        results[0]
    );
    assert_eq!(results[0], results[1]);
    assert_eq!(results[0], results[2]);

    let want = btreemap! {
        key("a") => LeaseInfo { holder: "node-3".to_string(), expiry: at(13) },
        key("b") => LeaseInfo { holder: "node-2".to_string(), expiry: at(9) },
    };
    for r in &replicas {
        assert_eq!(want, r.leases(r.global_time()));
        assert_eq!(at(12), r.global_time());
    }

    // Snapshots are byte for byte identical.
    let first = persisted(&replicas[0])?;
    for r in &replicas[1..] {
        assert_eq!(first, persisted(r)?);
    }
    Ok(())
}

#[test]
fn test_catch_up_from_snapshot() -> anyhow::Result<()> {
    let log = committed_log();
    let (head, tail) = log.split_at(6);

    let leader = LeaseFsm::new();
    drive(&leader, head);
    let snapshot = persisted(&leader)?;
    drive(&leader, tail);

    // A new replica installs the compacted prefix, then applies the rest of the log.
    let follower = LeaseFsm::new();
    follower.restore(&mut Cursor::new(snapshot))?;
    drive(&follower, tail);

    assert_eq!(persisted(&leader)?, persisted(&follower)?);
    Ok(())
}

#[test]
fn test_reads_during_apply() -> anyhow::Result<()> {
    let fsm = Arc::new(LeaseFsm::new());

    let reader = {
        let fsm = fsm.clone();
        thread::spawn(move || {
            for _ in 0..1000 {
                // A lease is always observed between whole commands: claimed at the current time
                // or one clock step before it.
                let snapshot = fsm.snapshot();
                for record in snapshot.entries.values() {
                    assert!(record.start <= snapshot.global_time);
                    assert!(snapshot.global_time <= record.expiry());
                }
            }
        })
    };

    let mut now = LogicalTime::EPOCH;
    for _ in 0..200 {
        fsm.apply_command(&Command::claim(key("x"), "me", Duration::from_secs(1)))?;
        let next = now + Duration::from_secs(1);
        fsm.apply_command(&Command::set_time(now, next))?;
        now = next;
        fsm.apply_command(&Command::expire(key("x")))?;
    }

    reader.join().expect("reader thread panicked");
    assert!(fsm.leases(now).is_empty());
    assert_eq!(at(200), fsm.global_time());
    Ok(())
}
