//! File identity, mime types and media result snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::services::{RatingValue, ServiceKey};

/// SHA-256 digest of a file's bytes. The sole identity of a file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const LEN: usize = 32;

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Hash(array))
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != Self::LEN * 2 || !s.is_ascii() {
            return None;
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Hash(out))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Two-hex-character bucket used to shard file and thumbnail storage.
    pub fn bucket(&self) -> String {
        format!("{:02x}", self.0[0])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

/// Internal row id of a known hash. Stable for the lifetime of the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Mime {
    ImageJpeg,
    ImagePng,
    ImageGif,
    ImageBmp,
    ImageWebp,
    VideoMp4,
    VideoWebm,
    VideoMkv,
    AudioMp3,
    AudioOgg,
    AudioFlac,
    ApplicationPdf,
    ApplicationZip,
    ApplicationFlash,
    TextPlain,
}

/// Which optional attributes a mime can carry. Anything not listed is
/// reported as absent, never as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MimeTraits {
    pub dimensions: bool,
    pub duration: bool,
    pub frames: bool,
    pub words: bool,
}

impl Mime {
    pub const ALL: [Mime; 15] = [
        Mime::ImageJpeg,
        Mime::ImagePng,
        Mime::ImageGif,
        Mime::ImageBmp,
        Mime::ImageWebp,
        Mime::VideoMp4,
        Mime::VideoWebm,
        Mime::VideoMkv,
        Mime::AudioMp3,
        Mime::AudioOgg,
        Mime::AudioFlac,
        Mime::ApplicationPdf,
        Mime::ApplicationZip,
        Mime::ApplicationFlash,
        Mime::TextPlain,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mime::ImageJpeg => "image/jpeg",
            Mime::ImagePng => "image/png",
            Mime::ImageGif => "image/gif",
            Mime::ImageBmp => "image/bmp",
            Mime::ImageWebp => "image/webp",
            Mime::VideoMp4 => "video/mp4",
            Mime::VideoWebm => "video/webm",
            Mime::VideoMkv => "video/x-matroska",
            Mime::AudioMp3 => "audio/mpeg",
            Mime::AudioOgg => "audio/ogg",
            Mime::AudioFlac => "audio/x-flac",
            Mime::ApplicationPdf => "application/pdf",
            Mime::ApplicationZip => "application/zip",
            Mime::ApplicationFlash => "application/x-shockwave-flash",
            Mime::TextPlain => "text/plain",
        }
    }

    pub fn from_mime_str(s: &str) -> Option<Self> {
        match s {
            "audio/flac" => Some(Mime::AudioFlac),
            "video/matroska" => Some(Mime::VideoMkv),
            _ => Mime::ALL.iter().copied().find(|m| m.as_str() == s),
        }
    }

    /// Stable integer code used in the database.
    pub fn code(&self) -> i64 {
        match self {
            Mime::ImageJpeg => 1,
            Mime::ImagePng => 2,
            Mime::ImageGif => 3,
            Mime::ImageBmp => 4,
            Mime::ImageWebp => 5,
            Mime::VideoMp4 => 20,
            Mime::VideoWebm => 21,
            Mime::VideoMkv => 22,
            Mime::AudioMp3 => 40,
            Mime::AudioOgg => 41,
            Mime::AudioFlac => 42,
            Mime::ApplicationPdf => 60,
            Mime::ApplicationZip => 61,
            Mime::ApplicationFlash => 62,
            Mime::TextPlain => 80,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Mime::ALL.iter().copied().find(|m| m.code() == code)
    }

    pub fn group(&self) -> MimeGroup {
        match self {
            Mime::ImageJpeg | Mime::ImagePng | Mime::ImageGif | Mime::ImageBmp | Mime::ImageWebp => {
                MimeGroup::Images
            }
            Mime::VideoMp4 | Mime::VideoWebm | Mime::VideoMkv => MimeGroup::Video,
            Mime::AudioMp3 | Mime::AudioOgg | Mime::AudioFlac => MimeGroup::Audio,
            Mime::ApplicationPdf
            | Mime::ApplicationZip
            | Mime::ApplicationFlash
            | Mime::TextPlain => MimeGroup::Applications,
        }
    }

    pub fn traits(&self) -> MimeTraits {
        let (dimensions, duration, frames, words) = match self {
            Mime::ImageGif => (true, true, true, false),
            Mime::ImageJpeg | Mime::ImagePng | Mime::ImageBmp | Mime::ImageWebp => {
                (true, false, false, false)
            }
            Mime::VideoMp4 | Mime::VideoWebm | Mime::VideoMkv | Mime::ApplicationFlash => {
                (true, true, true, false)
            }
            Mime::AudioMp3 | Mime::AudioOgg | Mime::AudioFlac => (false, true, false, false),
            Mime::ApplicationPdf | Mime::TextPlain => (false, false, false, true),
            Mime::ApplicationZip => (false, false, false, false),
        };
        MimeTraits { dimensions, duration, frames, words }
    }
}

impl fmt::Display for Mime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MimeGroup {
    Images,
    Video,
    Audio,
    Applications,
}

impl MimeGroup {
    pub fn mimes(&self) -> BTreeSet<Mime> {
        Mime::ALL.iter().copied().filter(|m| m.group() == *self).collect()
    }
}

/// Tags one tag service holds for a file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceTags {
    pub current: BTreeSet<String>,
    pub pending: BTreeSet<String>,
}

/// Point-in-time snapshot of everything known about one file.
///
/// A fresh snapshot is built for every read; nothing mutates one after it
/// has been handed out.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaResult {
    pub(crate) hash: Hash,
    pub(crate) inbox: bool,
    pub(crate) size: u64,
    pub(crate) mime: Mime,
    pub(crate) timestamp: Option<i64>,
    pub(crate) width: Option<u32>,
    pub(crate) height: Option<u32>,
    pub(crate) duration: Option<u64>,
    pub(crate) num_frames: Option<u32>,
    pub(crate) num_words: Option<u32>,
    pub(crate) tags: BTreeMap<ServiceKey, ServiceTags>,
    pub(crate) current_file_services: BTreeSet<ServiceKey>,
    pub(crate) pending_file_services: BTreeSet<ServiceKey>,
    pub(crate) ratings: BTreeMap<ServiceKey, RatingValue>,
}

impl MediaResult {
    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn inbox(&self) -> bool {
        self.inbox
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mime(&self) -> Mime {
        self.mime
    }

    /// Import time into the local file service, or the earliest time the
    /// file became current anywhere if it is not local.
    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    pub fn width(&self) -> Option<u32> {
        self.width
    }

    pub fn height(&self) -> Option<u32> {
        self.height
    }

    /// Duration in milliseconds.
    pub fn duration(&self) -> Option<u64> {
        self.duration
    }

    pub fn num_frames(&self) -> Option<u32> {
        self.num_frames
    }

    pub fn num_words(&self) -> Option<u32> {
        self.num_words
    }

    pub fn tags(&self) -> &BTreeMap<ServiceKey, ServiceTags> {
        &self.tags
    }

    /// Distinct current and pending tags across every tag service.
    pub fn all_tags(&self) -> BTreeSet<&str> {
        self.tags
            .values()
            .flat_map(|t| t.current.iter().chain(t.pending.iter()))
            .map(String::as_str)
            .collect()
    }

    pub fn current_file_services(&self) -> &BTreeSet<ServiceKey> {
        &self.current_file_services
    }

    pub fn pending_file_services(&self) -> &BTreeSet<ServiceKey> {
        &self.pending_file_services
    }

    pub fn ratings(&self) -> &BTreeMap<ServiceKey, RatingValue> {
        &self.ratings
    }
}
