#![doc = include_str!("../README.md")]
#![allow(clippy::uninlined_format_args)]
#![deny(unused_qualifications)]

//! # Modules
//!
//! - [`command`]: the versioned wire unit of mutation and its validation.
//! - [`fsm`]: [`LeaseFsm`], the state machine that applies commands.
//! - [`snapshot`]: point-in-time capture of the FSM for log compaction.
//! - [`storage`]: the seams a consensus driver plugs into: [`LogConsumer`], [`SnapshotSink`]
//!   and [`SnapshotSource`].
//! - [`file_store`]: a directory backed snapshot store.

mod config;
mod lease;
mod time;

pub mod command;
pub mod error;
pub mod file_store;
pub mod fsm;
pub mod snapshot;
pub mod storage;

pub use crate::command::Command;
pub use crate::command::Operation;
pub use crate::command::COMMAND_VERSION;
pub use crate::config::Config;
pub use crate::config::ConfigError;
pub use crate::error::ApplyError;
pub use crate::error::NotValid;
pub use crate::error::Rejection;
pub use crate::error::SnapshotError;
pub use crate::file_store::FileSnapshotStore;
pub use crate::fsm::ApplyResponse;
pub use crate::fsm::LeaseEvent;
pub use crate::fsm::LeaseFsm;
pub use crate::fsm::NotifyTarget;
pub use crate::lease::LeaseInfo;
pub use crate::lease::LeaseKey;
pub use crate::lease::LeaseRecord;
pub use crate::snapshot::Snapshot;
pub use crate::snapshot::SNAPSHOT_VERSION;
pub use crate::storage::LogConsumer;
pub use crate::storage::PersistSnapshot;
pub use crate::storage::SnapshotSink;
pub use crate::storage::SnapshotSource;
pub use crate::time::LogicalTime;
