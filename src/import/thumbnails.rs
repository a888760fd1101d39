use anyhow::Result;
use image::ImageFormat;
use std::fs;
use std::path::Path;

/// Renders bounded JPEG thumbnails into the sharded thumbnail directory.
pub struct ThumbnailGenerator {
    size: u32,
}

impl ThumbnailGenerator {
    pub fn new(size: u32) -> Self {
        Self { size }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Generate a thumbnail of `bytes` at `dest`, overwriting any existing one.
    pub fn generate(&self, bytes: &[u8], dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let img = image::load_from_memory(bytes)?;
        let thumbnail = img.thumbnail(self.size, self.size);

        // JPEG has no alpha channel
        thumbnail.to_rgb8().save_with_format(dest, ImageFormat::Jpeg)?;

        Ok(())
    }
}
