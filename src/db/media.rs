//! Media result snapshots.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rusqlite::{Connection, OptionalExtension};

use super::schema::STATUS_PENDING;
use super::services::{all_services, local_file_service_id};
use super::Database;
use crate::error::{Error, Result};
use crate::media::{FileId, Hash, MediaResult, Mime, ServiceTags};
use crate::services::Service;

type FileRow = (Vec<u8>, i64, i64, Option<u32>, Option<u32>, Option<i64>, Option<u32>, Option<u32>, bool);

fn load(conn: &Connection, services: &HashMap<i64, Service>, local: i64, id: i64) -> Result<Option<MediaResult>> {
    let row: Option<FileRow> = conn
        .query_row(
            r#"
            SELECT h.hash, f.size, f.mime, f.width, f.height, f.duration, f.num_frames, f.num_words,
                   EXISTS(SELECT 1 FROM file_inbox i WHERE i.hash_id = f.hash_id)
            FROM files_info f
            JOIN hashes h ON h.hash_id = f.hash_id
            WHERE f.hash_id = ?
            "#,
            [id],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                ))
            },
        )
        .optional()?;
    let Some((hash, size, mime, width, height, duration, num_frames, num_words, inbox)) = row else {
        return Ok(None);
    };
    let hash = Hash::from_slice(&hash)
        .ok_or(Error::Database(rusqlite::Error::InvalidColumnType(
            0,
            "hash".into(),
            rusqlite::types::Type::Blob,
        )))?;
    let mime = Mime::from_code(mime)
        .ok_or(Error::Database(rusqlite::Error::IntegralValueOutOfRange(2, mime)))?;

    let key_of = |service_id: i64| services.get(&service_id).map(|s| s.key().clone());

    let mut current_file_services = BTreeSet::new();
    let mut timestamp = None;
    let mut local_timestamp = None;
    let mut stmt = conn.prepare("SELECT service_id, timestamp FROM current_files WHERE hash_id = ?")?;
    let current: Vec<(i64, i64)> = stmt
        .query_map([id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<_>>()?;
    for (service_id, ts) in current {
        if service_id == local {
            local_timestamp = Some(ts);
        }
        timestamp = Some(timestamp.map_or(ts, |t: i64| t.min(ts)));
        current_file_services.extend(key_of(service_id));
    }

    let mut stmt = conn.prepare("SELECT service_id FROM pending_files WHERE hash_id = ?")?;
    let pending_file_services: BTreeSet<_> = stmt
        .query_map([id], |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .filter_map(key_of)
        .collect();

    let mut tags: BTreeMap<_, ServiceTags> = BTreeMap::new();
    let mut stmt = conn.prepare(
        r#"
        SELECT m.service_id, t.tag, m.status
        FROM mappings m JOIN tags t ON t.tag_id = m.tag_id
        WHERE m.hash_id = ?
        "#,
    )?;
    let mappings: Vec<(i64, String, i64)> = stmt
        .query_map([id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<rusqlite::Result<_>>()?;
    for (service_id, tag, status) in mappings {
        let Some(key) = key_of(service_id) else { continue };
        let entry = tags.entry(key).or_default();
        if status == STATUS_PENDING {
            entry.pending.insert(tag);
        } else {
            entry.current.insert(tag);
        }
    }

    let mut ratings = BTreeMap::new();
    let mut stmt = conn.prepare("SELECT service_id, rating FROM ratings WHERE hash_id = ?")?;
    let stored: Vec<(i64, f64)> = stmt
        .query_map([id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<_>>()?;
    for (service_id, rating) in stored {
        if let Some(service) = services.get(&service_id) {
            if let Some(value) = service.config.decode_rating(rating) {
                ratings.insert(service.key().clone(), value);
            }
        }
    }

    Ok(Some(MediaResult {
        hash,
        inbox,
        size: size as u64,
        mime,
        timestamp: local_timestamp.or(timestamp),
        width,
        height,
        duration: duration.map(|d| d as u64),
        num_frames,
        num_words,
        tags,
        current_file_services,
        pending_file_services,
        ratings,
    }))
}

impl Database {
    /// Fresh snapshots for the given file ids, in the order asked. Ids with
    /// no file metadata on record are skipped.
    pub fn media_results(&self, ids: &[FileId]) -> Result<Vec<MediaResult>> {
        let services: HashMap<i64, Service> = all_services(&self.conn)?
            .into_iter()
            .map(|row| (row.id, row.service))
            .collect();
        let local = local_file_service_id(&self.conn)?;

        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(result) = load(&self.conn, &services, local, id.0)? {
                results.push(result);
            }
        }
        Ok(results)
    }

    pub fn media_result(&self, hash: &Hash) -> Result<Option<MediaResult>> {
        let ids = self.file_ids(std::slice::from_ref(hash))?;
        Ok(self.media_results(&ids)?.pop())
    }
}
