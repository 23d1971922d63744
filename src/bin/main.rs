use std::fs;
use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use raftlease::Command;
use raftlease::Config;
use raftlease::FileSnapshotStore;
use raftlease::LeaseFsm;
use raftlease::LogicalTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "Inspect lease state machine snapshots and commands", long_about = None)]
pub struct Opt {
    #[clap(flatten)]
    pub config: Config,

    #[clap(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Cmd {
    /// Restore a snapshot from the snapshot dir and print the global time and the lease table
    Inspect {
        /// Snapshot id; the newest snapshot if not given
        #[clap(long)]
        id: Option<String>,
    },

    /// Decode and validate a command payload stored in a file
    Decode { path: PathBuf },
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opt = Opt::parse();
    let config = opt.config.validate()?;

    match opt.cmd {
        Cmd::Inspect { id } => inspect(&config, id),
        Cmd::Decode { path } => decode(path),
    }
}

fn inspect(config: &Config, id: Option<String>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let store = FileSnapshotStore::open(config)?;

    let (id, mut source) = match id {
        Some(id) => {
            let source = store.open_snapshot(&id)?;
            (id, source)
        }
        None => store.latest()?.ok_or_else(|| format!("no snapshot in {}", store.dir().display()))?,
    };

    let fsm = LeaseFsm::new();
    fsm.restore(&mut source)?;

    println!("snapshot: {}", id);
    println!("global time: {}", fsm.global_time());
    for (key, info) in fsm.leases(LogicalTime::EPOCH) {
        println!("{}: {}", key, info);
    }

    Ok(())
}

fn decode(path: PathBuf) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let data = fs::read(&path)?;
    let command = Command::decode(&data)?;
    command.validate()?;

    println!("{}", command);
    Ok(())
}
