use md5::{Digest, Md5};
use sha2::Sha256;

use crate::media::Hash;

/// Primary and secondary digests of a file's bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHashes {
    pub sha256: Hash,
    pub md5: [u8; 16],
}

impl ContentHashes {
    pub fn md5_hex(&self) -> String {
        self.md5.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

pub fn calculate_hashes(bytes: &[u8]) -> ContentHashes {
    let mut md5_hasher = Md5::new();
    let mut sha256_hasher = Sha256::new();

    for chunk in bytes.chunks(8192) {
        md5_hasher.update(chunk);
        sha256_hasher.update(chunk);
    }

    let mut sha256 = [0u8; 32];
    sha256.copy_from_slice(&sha256_hasher.finalize());
    let mut md5 = [0u8; 16];
    md5.copy_from_slice(&md5_hasher.finalize());

    ContentHashes {
        sha256: Hash(sha256),
        md5,
    }
}
