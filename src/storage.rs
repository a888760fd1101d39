//! On-disk layout of a storage root.
//!
//! ```text
//! <root>/client.db
//! <root>/client_files/00 .. ff/<hex hash>
//! <root>/client_thumbnails/00 .. ff/<hex hash>
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::media::Hash;

pub const DB_FILENAME: &str = "client.db";
pub const FILES_DIR: &str = "client_files";
pub const THUMBNAILS_DIR: &str = "client_thumbnails";

#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(DB_FILENAME)
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join(FILES_DIR)
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.root.join(THUMBNAILS_DIR)
    }

    pub fn file_path(&self, hash: &Hash) -> PathBuf {
        self.files_dir().join(hash.bucket()).join(hash.to_hex())
    }

    pub fn thumbnail_path(&self, hash: &Hash) -> PathBuf {
        self.thumbnails_dir().join(hash.bucket()).join(hash.to_hex())
    }

    /// Create the root and all 256 buckets of both sharded directories.
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        for dir in [self.files_dir(), self.thumbnails_dir()] {
            for bucket in 0..=255u8 {
                let path = dir.join(format!("{:02x}", bucket));
                if !path.exists() {
                    fs::create_dir_all(&path)?;
                }
            }
        }
        Ok(())
    }
}
