//! Content update pipeline: file status, tag mappings and ratings.

use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use super::files::{get_or_create_hash_id, get_or_create_tag_id, has_file_info, hash_id, is_current, tag_id};
use super::schema::{STATUS_CURRENT, STATUS_PENDING};
use super::services::{require_service, ServiceRow};
use super::{now, Database};
use crate::content::{
    ContentDataType, ContentUpdate, FilesUpdate, MappingAction, MappingsUpdate, RatingsUpdate,
    ServiceUpdates,
};
use crate::error::{Error, Result};
use crate::media::Hash;
use crate::services::{ServiceKey, ServiceType};

/// Ids of the hashes that have file metadata on record. Unknown files are
/// skipped; a file update cannot conjure metadata.
fn known_files(conn: &Connection, hashes: &[Hash]) -> Result<Vec<i64>> {
    let mut ids = Vec::with_capacity(hashes.len());
    for hash in hashes {
        match hash_id(conn, hash)? {
            Some(id) if has_file_info(conn, id)? => ids.push(id),
            _ => warn!(hash = %hash, "Skipping update for unknown file"),
        }
    }
    Ok(ids)
}

fn check_target(row: &ServiceRow, update: &ContentUpdate) -> Result<()> {
    let service_type = row.service.service_type();
    let fits = match update.data_type() {
        ContentDataType::Files => service_type.is_file_service(),
        ContentDataType::Mappings => service_type.is_tag_service(),
        ContentDataType::Ratings => service_type.is_rating_service(),
    };
    if !fits {
        return Err(Error::InvalidUpdate(format!(
            "{} update cannot target {} service {}",
            update.data_type().as_str(),
            service_type,
            row.service.key()
        )));
    }
    let repository_only =
        matches!(update, ContentUpdate::Files(FilesUpdate::Add(_))) || update.is_pending_action();
    if repository_only && !service_type.is_repository() {
        return Err(Error::InvalidUpdate(format!(
            "{} service {} has no upload queue or remote listing",
            service_type,
            row.service.key()
        )));
    }
    Ok(())
}

fn apply_files(conn: &Connection, row: &ServiceRow, update: &FilesUpdate) -> Result<usize> {
    let ids = known_files(conn, update.hashes())?;
    let service_id = row.id;
    let mut changed = 0;
    for id in ids {
        changed += match update {
            FilesUpdate::Add(_) => {
                conn.execute(
                    "DELETE FROM pending_files WHERE service_id = ? AND hash_id = ?",
                    params![service_id, id],
                )?;
                conn.execute(
                    "INSERT OR IGNORE INTO current_files (service_id, hash_id, timestamp) VALUES (?, ?, ?)",
                    params![service_id, id, now()],
                )?
            }
            FilesUpdate::Delete(_) => {
                let removed = conn.execute(
                    "DELETE FROM current_files WHERE service_id = ? AND hash_id = ?",
                    params![service_id, id],
                )?;
                if row.service.service_type() == ServiceType::LocalFile {
                    conn.execute("DELETE FROM file_inbox WHERE hash_id = ?", [id])?;
                }
                removed
            }
            FilesUpdate::Archive(_) => {
                conn.execute("DELETE FROM file_inbox WHERE hash_id = ?", [id])?
            }
            FilesUpdate::Inbox(_) => {
                conn.execute("INSERT OR IGNORE INTO file_inbox (hash_id) VALUES (?)", [id])?
            }
            FilesUpdate::Pend(_) => {
                if is_current(conn, service_id, id)? {
                    0
                } else {
                    conn.execute(
                        "INSERT OR IGNORE INTO pending_files (service_id, hash_id) VALUES (?, ?)",
                        params![service_id, id],
                    )?
                }
            }
            FilesUpdate::RescindPend(_) => conn.execute(
                "DELETE FROM pending_files WHERE service_id = ? AND hash_id = ?",
                params![service_id, id],
            )?,
        };
    }
    Ok(changed)
}

fn mapping_exists(conn: &Connection, service_id: i64, tag_id: i64, hash_id: i64, status: i64) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM mappings WHERE service_id = ? AND tag_id = ? AND hash_id = ? AND status = ?)",
        params![service_id, tag_id, hash_id, status],
        |row| row.get(0),
    )?)
}

fn apply_mappings(conn: &Connection, row: &ServiceRow, update: &MappingsUpdate) -> Result<usize> {
    let service_id = row.id;
    let mut changed = 0;
    match update.action() {
        MappingAction::Add | MappingAction::Pend => {
            let tag = get_or_create_tag_id(conn, update.tag())?;
            for hash in update.hashes() {
                let id = get_or_create_hash_id(conn, hash)?;
                if update.action() == MappingAction::Add {
                    conn.execute(
                        "DELETE FROM mappings WHERE service_id = ? AND tag_id = ? AND hash_id = ? AND status = ?",
                        params![service_id, tag, id, STATUS_PENDING],
                    )?;
                    changed += conn.execute(
                        "INSERT OR IGNORE INTO mappings (service_id, tag_id, hash_id, status) VALUES (?, ?, ?, ?)",
                        params![service_id, tag, id, STATUS_CURRENT],
                    )?;
                } else if !mapping_exists(conn, service_id, tag, id, STATUS_CURRENT)? {
                    changed += conn.execute(
                        "INSERT OR IGNORE INTO mappings (service_id, tag_id, hash_id, status) VALUES (?, ?, ?, ?)",
                        params![service_id, tag, id, STATUS_PENDING],
                    )?;
                }
            }
        }
        MappingAction::Delete | MappingAction::RescindPend => {
            let Some(tag) = tag_id(conn, update.tag())? else {
                return Ok(0);
            };
            let status = if update.action() == MappingAction::Delete {
                STATUS_CURRENT
            } else {
                STATUS_PENDING
            };
            for hash in update.hashes() {
                if let Some(id) = hash_id(conn, hash)? {
                    changed += conn.execute(
                        "DELETE FROM mappings WHERE service_id = ? AND tag_id = ? AND hash_id = ? AND status = ?",
                        params![service_id, tag, id, status],
                    )?;
                }
            }
        }
    }
    Ok(changed)
}

fn apply_ratings(conn: &Connection, row: &ServiceRow, update: &RatingsUpdate) -> Result<usize> {
    match update {
        RatingsUpdate::Set { hash, value } => {
            let stored = row.service.config.encode_rating(value)?;
            let id = get_or_create_hash_id(conn, hash)?;
            Ok(conn.execute(
                "INSERT OR REPLACE INTO ratings (service_id, hash_id, rating) VALUES (?, ?, ?)",
                params![row.id, id, stored],
            )?)
        }
        RatingsUpdate::Clear { hash } => match hash_id(conn, hash)? {
            Some(id) => Ok(conn.execute(
                "DELETE FROM ratings WHERE service_id = ? AND hash_id = ?",
                params![row.id, id],
            )?),
            None => Ok(0),
        },
    }
}

fn apply_update(conn: &Connection, row: &ServiceRow, update: &ContentUpdate) -> Result<usize> {
    check_target(row, update)?;
    match update {
        ContentUpdate::Files(files) => apply_files(conn, row, files),
        ContentUpdate::Mappings(mappings) => apply_mappings(conn, row, mappings),
        ContentUpdate::Ratings(ratings) => apply_ratings(conn, row, ratings),
    }
}

impl Database {
    /// Apply per-service content updates in order, as one transaction.
    pub fn apply_content_updates(&mut self, updates: &ServiceUpdates) -> Result<()> {
        let tx = self.conn.transaction()?;
        let mut changed = 0;
        for (key, list) in updates {
            if *key == ServiceKey::combined_file() || *key == ServiceKey::combined_tag() {
                return Err(Error::InvalidUpdate(format!("{} is a combined service", key)));
            }
            let row = require_service(&tx, key)?;
            for update in list {
                let rows = apply_update(&tx, &row, update)?;
                debug!(service = %key, data_type = update.data_type().as_str(), rows, "Applied content update");
                changed += rows;
            }
        }
        tx.commit()?;
        info!(services = updates.len(), rows = changed, "Committed content updates");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::FileInfo;
    use crate::media::Mime;
    use crate::services::{Credentials, ExtraInfo, RatingValue, ServiceEdit, ServiceIdentifier};
    use crate::storage::StorageLayout;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn seeded() -> (tempfile::TempDir, Database, Hash) {
        let dir = tempdir().unwrap();
        let mut db = Database::open(StorageLayout::new(dir.path())).unwrap();
        let hash = Hash([5; 32]);
        db.record_local_import(&hash, &FileInfo::new(10, Mime::ImageJpeg), &[0; 16], None)
            .unwrap();
        (dir, db, hash)
    }

    fn count(db: &Database, sql: &str) -> i64 {
        db.conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn test_mapping_add_is_idempotent() {
        let (_dir, mut db, hash) = seeded();
        let add = BTreeMap::from([(
            ServiceKey::local_tag(),
            vec![
                ContentUpdate::add_mapping("car", vec![hash]).unwrap(),
                ContentUpdate::add_mapping("Car", vec![hash]).unwrap(),
            ],
        )]);
        db.apply_content_updates(&add).unwrap();
        db.apply_content_updates(&add).unwrap();
        assert_eq!(count(&db, "SELECT COUNT(*) FROM mappings"), 1);
    }

    #[test]
    fn test_mapping_delete_is_idempotent() {
        let (_dir, mut db, hash) = seeded();
        let local_tags = |updates| BTreeMap::from([(ServiceKey::local_tag(), updates)]);

        // Unknown tag.
        db.apply_content_updates(&local_tags(vec![ContentUpdate::delete_mapping("ghost", vec![hash]).unwrap()]))
            .unwrap();
        assert_eq!(count(&db, "SELECT COUNT(*) FROM tags"), 0);

        let other = Hash([6; 32]);
        db.record_local_import(&other, &FileInfo::new(10, Mime::ImageJpeg), &[0; 16], None)
            .unwrap();
        db.apply_content_updates(&local_tags(vec![
            ContentUpdate::add_mapping("car", vec![other]).unwrap(),
            ContentUpdate::add_mapping("sky", vec![hash]).unwrap(),
        ]))
        .unwrap();

        // Known tag, no row for this file.
        db.apply_content_updates(&local_tags(vec![ContentUpdate::delete_mapping("car", vec![hash]).unwrap()]))
            .unwrap();
        assert_eq!(count(&db, "SELECT COUNT(*) FROM mappings"), 2);

        let delete_sky = local_tags(vec![ContentUpdate::delete_mapping("sky", vec![hash]).unwrap()]);
        db.apply_content_updates(&delete_sky).unwrap();
        db.apply_content_updates(&delete_sky).unwrap();
        assert_eq!(count(&db, "SELECT COUNT(*) FROM mappings"), 1);
        assert!(db.media_result(&other).unwrap().unwrap().all_tags().contains("car"));
    }

    #[test]
    fn test_archive_then_inbox() {
        let (_dir, mut db, hash) = seeded();
        let local_files = |update| BTreeMap::from([(ServiceKey::local_file(), vec![update])]);

        db.apply_content_updates(&local_files(ContentUpdate::archive(vec![hash]))).unwrap();
        assert!(!db.media_result(&hash).unwrap().unwrap().inbox());

        db.apply_content_updates(&local_files(ContentUpdate::inbox(vec![hash]))).unwrap();
        assert!(db.media_result(&hash).unwrap().unwrap().inbox());
        assert_eq!(count(&db, "SELECT COUNT(*) FROM file_inbox"), 1);
    }

    #[test]
    fn test_local_delete_archives() {
        let (_dir, mut db, hash) = seeded();
        db.apply_content_updates(&BTreeMap::from([(
            ServiceKey::local_file(),
            vec![ContentUpdate::delete_files(vec![hash])],
        )]))
        .unwrap();
        assert_eq!(count(&db, "SELECT COUNT(*) FROM current_files"), 0);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM file_inbox"), 0);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM files_info"), 1);
    }

    #[test]
    fn test_wrong_service_type_rejected() {
        let (_dir, mut db, hash) = seeded();
        let err = db.apply_content_updates(&BTreeMap::from([(
            ServiceKey::local_file(),
            vec![ContentUpdate::add_mapping("car", vec![hash]).unwrap()],
        )]));
        assert!(matches!(err, Err(Error::InvalidUpdate(_))));

        let err = db.apply_content_updates(&BTreeMap::from([(
            ServiceKey::local_tag(),
            vec![ContentUpdate::Mappings(
                MappingsUpdate::new(MappingAction::Pend, "car", vec![hash]).unwrap(),
            )],
        )]));
        assert!(matches!(err, Err(Error::InvalidUpdate(_))));

        let err = db.apply_content_updates(&BTreeMap::from([(
            ServiceKey::combined_tag(),
            vec![ContentUpdate::add_mapping("car", vec![hash]).unwrap()],
        )]));
        assert!(matches!(err, Err(Error::InvalidUpdate(_))));
    }

    #[test]
    fn test_out_of_bounds_rating_rolls_back_batch() {
        let (_dir, mut db, hash) = seeded();
        let stars = ServiceIdentifier::new(ServiceKey::generate(), ServiceType::LocalRatingNumerical, "stars");
        db.apply_edit_log(&[ServiceEdit::Add {
            identifier: stars.clone(),
            credentials: None,
            extra_info: Some(ExtraInfo::NumericalBounds { lower: 1, upper: 5 }),
        }])
        .unwrap();

        let err = db.apply_content_updates(&BTreeMap::from([
            (
                ServiceKey::local_tag(),
                vec![ContentUpdate::add_mapping("car", vec![hash]).unwrap()],
            ),
            (
                stars.key.clone(),
                vec![ContentUpdate::set_rating(hash, RatingValue::Numerical(6))],
            ),
        ]));
        assert!(matches!(err, Err(Error::InvalidRating(_))));
        assert_eq!(count(&db, "SELECT COUNT(*) FROM mappings"), 0);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM ratings"), 0);
    }

    #[test]
    fn test_repository_pending_lifecycle() {
        let (_dir, mut db, hash) = seeded();
        let repo = ServiceIdentifier::new(ServiceKey::generate(), ServiceType::FileRepository, "files");
        db.apply_edit_log(&[ServiceEdit::Add {
            identifier: repo.clone(),
            credentials: Some(Credentials::new("example_host", 80, None)),
            extra_info: None,
        }])
        .unwrap();

        let pend = BTreeMap::from([(
            repo.key.clone(),
            vec![ContentUpdate::Files(FilesUpdate::Pend(vec![hash]))],
        )]);
        db.apply_content_updates(&pend).unwrap();
        assert_eq!(count(&db, "SELECT COUNT(*) FROM pending_files"), 1);

        db.apply_content_updates(&BTreeMap::from([(
            repo.key.clone(),
            vec![ContentUpdate::Files(FilesUpdate::Add(vec![hash]))],
        )]))
        .unwrap();
        assert_eq!(count(&db, "SELECT COUNT(*) FROM pending_files"), 0);
        assert_eq!(count(&db, "SELECT COUNT(*) FROM current_files"), 2);

        // Already current, so pending again is a no-op.
        db.apply_content_updates(&pend).unwrap();
        assert_eq!(count(&db, "SELECT COUNT(*) FROM pending_files"), 0);
    }
}
