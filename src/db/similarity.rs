//! Perceptual hash comparison for SIMILAR_TO queries.

use img_hash::ImageHash;
use rusqlite::Connection;

use crate::error::Result;
use crate::media::Hash;

/// Hamming distance between two stored perceptual hashes. Hashes that do
/// not decode, or differ in length, are never comparable.
pub fn hamming_distance(a: &[u8], b: &[u8]) -> Option<u32> {
    if a.len() != b.len() {
        return None;
    }
    let h1 = ImageHash::<Box<[u8]>>::from_bytes(a).ok()?;
    let h2 = ImageHash::<Box<[u8]>>::from_bytes(b).ok()?;
    Some(h1.dist(&h2))
}

/// Hash ids whose perceptual hash lies within `max_distance` of `target`'s.
/// Empty when the target is unknown or has no perceptual hash.
pub(crate) fn similar_hash_ids(conn: &Connection, target: &Hash, max_distance: u32) -> Result<Vec<i64>> {
    let target_phash = conn.query_row(
        r#"
        SELECT p.phash FROM perceptual_hashes p
        JOIN hashes h ON h.hash_id = p.hash_id
        WHERE h.hash = ?
        "#,
        [target.as_bytes()],
        |row| row.get::<_, Vec<u8>>(0),
    );
    let target_phash = match target_phash {
        Ok(phash) => phash,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut stmt = conn.prepare("SELECT hash_id, phash FROM perceptual_hashes")?;
    let candidates: Vec<(i64, Vec<u8>)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<_>>()?;

    Ok(candidates
        .into_iter()
        .filter(|(_, phash)| {
            hamming_distance(&target_phash, phash).is_some_and(|d| d <= max_distance)
        })
        .map(|(id, _)| id)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hamming_distance() {
        assert_eq!(hamming_distance(&[0b1010], &[0b1010]), Some(0));
        assert_eq!(hamming_distance(&[0xff, 0x00], &[0x00, 0x00]), Some(8));
        assert_eq!(hamming_distance(&[0b0001], &[0b1000]), Some(2));
        assert_eq!(hamming_distance(&[1, 2], &[1]), None);
    }

    #[test]
    fn test_distance_between_image_hashes() {
        use crate::import::metadata::calculate_perceptual_hash;
        use image::{DynamicImage, RgbImage};

        let gradient = RgbImage::from_fn(64, 64, |x, y| image::Rgb([(x * 4) as u8, (y * 4) as u8, 0]));
        let flipped = image::imageops::flip_horizontal(&gradient);
        let a = calculate_perceptual_hash(&DynamicImage::ImageRgb8(gradient)).unwrap();
        let b = calculate_perceptual_hash(&DynamicImage::ImageRgb8(flipped)).unwrap();

        assert_eq!(hamming_distance(&a, &a), Some(0));
        let expected = ImageHash::<Box<[u8]>>::from_bytes(&a)
            .unwrap()
            .dist(&ImageHash::<Box<[u8]>>::from_bytes(&b).unwrap());
        assert_eq!(hamming_distance(&a, &b), Some(expected));
        assert!(expected > 0);
    }
}
