use anyhow::{anyhow, Result};
use image::{AnimationDecoder, DynamicImage};
use std::io::Cursor;
use std::path::Path;

use crate::db::FileInfo;
use crate::media::{Mime, MimeGroup};

/// What an extractor learned about a file's content.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMetadata {
    pub mime: Mime,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Milliseconds.
    pub duration: Option<u64>,
    pub num_frames: Option<u32>,
    pub num_words: Option<u32>,
    pub perceptual_hash: Option<Vec<u8>>,
}

impl FileMetadata {
    pub fn new(mime: Mime) -> Self {
        Self {
            mime,
            width: None,
            height: None,
            duration: None,
            num_frames: None,
            num_words: None,
            perceptual_hash: None,
        }
    }

    /// Storable file info for `size` bytes, with inapplicable attributes
    /// stripped for the mime.
    pub fn file_info(&self, size: u64) -> FileInfo {
        FileInfo {
            size,
            mime: self.mime,
            width: self.width,
            height: self.height,
            duration: self.duration,
            num_frames: self.num_frames,
            num_words: self.num_words,
        }
        .normalized()
    }
}

/// Parses file content into metadata. Anything it cannot recognise is an
/// error, which fails the import of that one file.
pub trait MetadataExtractor: Send {
    fn extract(&self, path: &Path, bytes: &[u8]) -> Result<FileMetadata>;
}

/// Sniffs the mime from magic bytes and decodes images for dimensions,
/// animation frames and a perceptual hash.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageExtractor;

impl MetadataExtractor for ImageExtractor {
    fn extract(&self, path: &Path, bytes: &[u8]) -> Result<FileMetadata> {
        let kind = infer::get(bytes)
            .ok_or_else(|| anyhow!("unrecognised content in {}", path.display()))?;
        let mime = Mime::from_mime_str(kind.mime_type())
            .ok_or_else(|| anyhow!("unsupported mime {}", kind.mime_type()))?;

        let mut metadata = FileMetadata::new(mime);
        if mime.group() != MimeGroup::Images {
            return Ok(metadata);
        }

        let img = image::load_from_memory(bytes)?;
        metadata.width = Some(img.width());
        metadata.height = Some(img.height());
        metadata.perceptual_hash = calculate_perceptual_hash(&img).ok();

        if mime == Mime::ImageGif {
            let (frames, duration) = gif_animation(bytes)?;
            if frames > 1 {
                metadata.num_frames = Some(frames);
                metadata.duration = Some(duration);
            }
        }
        Ok(metadata)
    }
}

/// Frame count and total delay in milliseconds of a GIF.
fn gif_animation(bytes: &[u8]) -> Result<(u32, u64)> {
    let decoder = image::codecs::gif::GifDecoder::new(Cursor::new(bytes))?;
    let mut frames = 0u32;
    let mut duration = 0u64;
    for frame in decoder.into_frames() {
        let (numer, denom) = frame?.delay().numer_denom_ms();
        frames += 1;
        if denom > 0 {
            duration += (numer / denom) as u64;
        }
    }
    Ok((frames, duration))
}

pub fn calculate_perceptual_hash(img: &DynamicImage) -> Result<Vec<u8>> {
    use img_hash::HasherConfig;

    // Hash a small thumbnail; thumbnail() preserves aspect ratio.
    let thumbnail = img.thumbnail(64, 64);

    let hasher = HasherConfig::new()
        .hash_size(16, 16)
        .to_hasher();

    let rgba = thumbnail.to_rgba8();
    let (width, height) = rgba.dimensions();

    let img_hash_image = img_hash::image::RgbaImage::from_raw(width, height, rgba.into_raw())
        .ok_or_else(|| anyhow!("Failed to create image for hashing"))?;

    let hash = hasher.hash_image(&img_hash::image::DynamicImage::ImageRgba8(img_hash_image));

    Ok(hash.as_bytes().to_vec())
}
