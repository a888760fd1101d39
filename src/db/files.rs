//! Hash, tag and file-info rows shared by import, content updates and reads.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::services::local_file_service_id;
use super::{now, Database};
use crate::error::Result;
use crate::media::{Hash, Mime};

/// Stored metadata of one file. Attributes a mime cannot carry are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub size: u64,
    pub mime: Mime,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<u64>,
    pub num_frames: Option<u32>,
    pub num_words: Option<u32>,
}

impl FileInfo {
    pub fn new(size: u64, mime: Mime) -> Self {
        Self {
            size,
            mime,
            width: None,
            height: None,
            duration: None,
            num_frames: None,
            num_words: None,
        }
    }

    /// Drop any attribute the mime does not define.
    pub fn normalized(mut self) -> Self {
        let traits = self.mime.traits();
        if !traits.dimensions {
            self.width = None;
            self.height = None;
        }
        if !traits.duration {
            self.duration = None;
        }
        if !traits.frames {
            self.num_frames = None;
        }
        if !traits.words {
            self.num_words = None;
        }
        self
    }
}

pub(crate) fn hash_id(conn: &Connection, hash: &Hash) -> Result<Option<i64>> {
    Ok(conn
        .query_row("SELECT hash_id FROM hashes WHERE hash = ?", [hash.as_bytes()], |row| row.get(0))
        .optional()?)
}

pub(crate) fn get_or_create_hash_id(conn: &Connection, hash: &Hash) -> Result<i64> {
    if let Some(id) = hash_id(conn, hash)? {
        return Ok(id);
    }
    conn.execute("INSERT INTO hashes (hash) VALUES (?)", [hash.as_bytes()])?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn tag_id(conn: &Connection, tag: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row("SELECT tag_id FROM tags WHERE tag = ?", [tag], |row| row.get(0))
        .optional()?)
}

pub(crate) fn get_or_create_tag_id(conn: &Connection, tag: &str) -> Result<i64> {
    if let Some(id) = tag_id(conn, tag)? {
        return Ok(id);
    }
    conn.execute("INSERT INTO tags (tag) VALUES (?)", [tag])?;
    Ok(conn.last_insert_rowid())
}

/// Whether full file metadata is on record for this hash.
pub(crate) fn has_file_info(conn: &Connection, hash_id: i64) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM files_info WHERE hash_id = ?)",
        [hash_id],
        |row| row.get(0),
    )?)
}

pub(crate) fn is_current(conn: &Connection, service_id: i64, hash_id: i64) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM current_files WHERE service_id = ? AND hash_id = ?)",
        params![service_id, hash_id],
        |row| row.get(0),
    )?)
}

fn upsert_file_info(conn: &Connection, hash_id: i64, info: &FileInfo) -> Result<()> {
    conn.execute(
        r#"
        INSERT OR REPLACE INTO files_info
            (hash_id, size, mime, width, height, duration, num_frames, num_words)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            hash_id,
            info.size as i64,
            info.mime.code(),
            info.width,
            info.height,
            info.duration.map(|d| d as i64),
            info.num_frames,
            info.num_words,
        ],
    )?;
    Ok(())
}

impl Database {
    /// Whether `hash` is current in the local file service.
    pub fn is_local(&self, hash: &Hash) -> Result<bool> {
        let Some(id) = hash_id(&self.conn, hash)? else {
            return Ok(false);
        };
        let local = local_file_service_id(&self.conn)?;
        is_current(&self.conn, local, id)
    }

    /// Record a locally imported file in one transaction: hash, metadata,
    /// secondary hashes and local presence. A file arriving in the local
    /// service for the first time lands in the inbox with a fresh
    /// timestamp; a regenerated one keeps both.
    pub fn record_local_import(
        &mut self,
        hash: &Hash,
        info: &FileInfo,
        md5: &[u8],
        perceptual_hash: Option<&[u8]>,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        let id = get_or_create_hash_id(&tx, hash)?;
        upsert_file_info(&tx, id, info)?;
        tx.execute(
            "INSERT OR REPLACE INTO local_hashes (hash_id, md5) VALUES (?, ?)",
            params![id, md5],
        )?;
        match perceptual_hash {
            Some(phash) => {
                tx.execute(
                    "INSERT OR REPLACE INTO perceptual_hashes (hash_id, phash) VALUES (?, ?)",
                    params![id, phash],
                )?;
            }
            None => {
                tx.execute("DELETE FROM perceptual_hashes WHERE hash_id = ?", [id])?;
            }
        }

        let local = local_file_service_id(&tx)?;
        let arrived = tx.execute(
            "INSERT OR IGNORE INTO current_files (service_id, hash_id, timestamp) VALUES (?, ?, ?)",
            params![local, id, now()],
        )?;
        if arrived > 0 {
            tx.execute("INSERT OR IGNORE INTO file_inbox (hash_id) VALUES (?)", [id])?;
        }
        tx.commit()?;

        debug!(hash = %hash, new = arrived > 0, "Recorded local file");
        Ok(())
    }
}
