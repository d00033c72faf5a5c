#![forbid(unsafe_code)]

mod config;
mod entry;
pub mod journal;
mod store;

pub use config::{ConfigStore, PolicyConfig};
pub use entry::{Entry, Timestamp, now_ms};
pub use journal::{
    FsyncPolicy, JournalRecord, JournalWriter, compact_journal, create_journal, replay_journal,
    restore_journal,
};
pub use store::EntryStore;
