//! File import: hash, extract, store and record one file at a time.

pub mod discovery;
pub mod hashing;
pub mod metadata;
pub mod thumbnails;

use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

pub use discovery::discover_files;
pub use hashing::{calculate_hashes, ContentHashes};
pub use metadata::{FileMetadata, ImageExtractor, MetadataExtractor};
pub use thumbnails::ThumbnailGenerator;

use crate::db::Database;
use crate::error::Result;
use crate::media::{Hash, MediaResult, MimeGroup};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Return a media result snapshot of the imported file.
    pub generate_media_result: bool,
    /// Re-extract and re-store a file that is already local.
    pub regenerate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStatus {
    Successful,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportOutcome {
    pub status: ImportStatus,
    /// Known once the bytes were read.
    pub hash: Option<Hash>,
    pub media_result: Option<MediaResult>,
    /// The file was already local and nothing was rewritten.
    pub redundant: bool,
    pub diagnostic: Option<String>,
}

impl ImportOutcome {
    fn failed(hash: Option<Hash>, diagnostic: String) -> Self {
        Self {
            status: ImportStatus::Failed,
            hash,
            media_result: None,
            redundant: false,
            diagnostic: Some(diagnostic),
        }
    }

    fn successful(hash: Hash, media_result: Option<MediaResult>, redundant: bool) -> Self {
        Self {
            status: ImportStatus::Successful,
            hash: Some(hash),
            media_result,
            redundant,
            diagnostic: None,
        }
    }

    pub fn is_successful(&self) -> bool {
        self.status == ImportStatus::Successful
    }
}

/// Brings files into the local file service. Unreadable or unrecognisable
/// files come back as a failed outcome; only storage failures are errors.
pub struct ContentStore {
    extractor: Box<dyn MetadataExtractor>,
    thumbnails: ThumbnailGenerator,
}

impl ContentStore {
    pub fn new(extractor: Box<dyn MetadataExtractor>, thumbnail_size: u32) -> Self {
        Self {
            extractor,
            thumbnails: ThumbnailGenerator::new(thumbnail_size),
        }
    }

    pub fn import(&self, db: &mut Database, path: &Path, options: &ImportOptions) -> Result<ImportOutcome> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read import");
                return Ok(ImportOutcome::failed(None, format!("cannot read {}: {}", path.display(), e)));
            }
        };

        let hashes = calculate_hashes(&bytes);
        let hash = hashes.sha256;

        if db.is_local(&hash)? && !options.regenerate {
            debug!(hash = %hash, path = %path.display(), "Already imported");
            let media_result = self.snapshot(db, &hash, options)?;
            return Ok(ImportOutcome::successful(hash, media_result, true));
        }

        let metadata = match self.extractor.extract(path, &bytes) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unrecognised import");
                return Ok(ImportOutcome::failed(Some(hash), e.to_string()));
            }
        };

        let layout = db.layout();
        let dest = layout.file_path(&hash);
        if options.regenerate || !dest.exists() {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&dest, &bytes)?;
        }

        if metadata.mime.group() == MimeGroup::Images {
            let thumbnail = layout.thumbnail_path(&hash);
            if let Err(e) = self.thumbnails.generate(&bytes, &thumbnail) {
                warn!(hash = %hash, error = %e, "Thumbnail generation failed");
            }
        }

        let info = metadata.file_info(bytes.len() as u64);
        db.record_local_import(&hash, &info, &hashes.md5, metadata.perceptual_hash.as_deref())?;
        info!(hash = %hash, mime = %info.mime, size = info.size, "Imported file");

        let media_result = self.snapshot(db, &hash, options)?;
        Ok(ImportOutcome::successful(hash, media_result, false))
    }

    fn snapshot(&self, db: &Database, hash: &Hash, options: &ImportOptions) -> Result<Option<MediaResult>> {
        if options.generate_media_result {
            db.media_result(hash)
        } else {
            Ok(None)
        }
    }
}

impl Default for ContentStore {
    fn default() -> Self {
        Self::new(Box::new(ImageExtractor), 200)
    }
}
