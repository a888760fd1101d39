//! SQLite-backed catalogue store.
//!
//! A [`Database`] is owned by exactly one thread, the job scheduler's worker.
//! Read operations take `&self`; every write operation runs inside a single
//! transaction and leaves no partial state behind when it fails.

mod content;
mod files;
mod media;
mod query;
pub mod schema;
mod services;
pub mod similarity;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::Result;
use crate::storage::StorageLayout;

pub use files::FileInfo;
pub use schema::SCHEMA;

pub struct Database {
    pub(crate) conn: Connection,
    layout: StorageLayout,
}

impl Database {
    /// Open (creating if needed) the database under a storage root, prepare
    /// the sharded directories and make sure the schema and local services
    /// exist.
    pub fn open(layout: StorageLayout) -> Result<Self> {
        layout.ensure()?;
        let path = layout.db_path();
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;",
        )?;
        debug!(path = %path.display(), "Opened database");

        let db = Self { conn, layout };
        db.initialize()?;
        Ok(db)
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        let seeded = services::seed_local_services(&self.conn)?;
        if seeded > 0 {
            info!(seeded, "Created local services");
        }
        Ok(())
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }
}

pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
