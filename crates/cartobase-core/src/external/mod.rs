//! External geodata synchronization.
//!
//! Reconciles three freshness states per configured table — what the source
//! reports, what a local cache remembers, and what the database recorded at
//! the last publish — then imports through a staging schema so the
//! production table is replaced atomically or not at all.

pub mod archive;
pub mod fetch;
pub mod sync;
pub mod table;

pub use fetch::{FetchOutcome, Fetcher};
pub use sync::{sync_all, sync_table, SyncOptions, SyncOutcome, SyncReport};
pub use table::{prepare_database, TrackedTable, GEOMETRY_COLUMN};
