//! Content updates: file status, tag mapping and rating changes.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::media::Hash;
use crate::predicates::clean_tag;
use crate::services::{RatingValue, ServiceKey};

/// Ordered updates per target service, applied as one transaction.
pub type ServiceUpdates = BTreeMap<ServiceKey, Vec<ContentUpdate>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentDataType {
    Files,
    Mappings,
    Ratings,
}

impl ContentDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentDataType::Files => "files",
            ContentDataType::Mappings => "mappings",
            ContentDataType::Ratings => "ratings",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilesUpdate {
    /// Mark already-known files current on a file repository.
    Add(Vec<Hash>),
    Delete(Vec<Hash>),
    Archive(Vec<Hash>),
    Inbox(Vec<Hash>),
    /// Queue for upload to a file repository.
    Pend(Vec<Hash>),
    RescindPend(Vec<Hash>),
}

impl FilesUpdate {
    pub fn hashes(&self) -> &[Hash] {
        match self {
            FilesUpdate::Add(h)
            | FilesUpdate::Delete(h)
            | FilesUpdate::Archive(h)
            | FilesUpdate::Inbox(h)
            | FilesUpdate::Pend(h)
            | FilesUpdate::RescindPend(h) => h,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingAction {
    Add,
    Delete,
    Pend,
    RescindPend,
}

/// A tag mapping change. The tag is canonical by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingsUpdate {
    action: MappingAction,
    tag: String,
    hashes: Vec<Hash>,
}

impl MappingsUpdate {
    pub fn new(action: MappingAction, tag: &str, hashes: Vec<Hash>) -> Result<Self> {
        let tag = clean_tag(tag).map_err(|_| Error::InvalidUpdate("empty tag".into()))?;
        Ok(Self { action, tag, hashes })
    }

    pub fn action(&self) -> MappingAction {
        self.action
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn hashes(&self) -> &[Hash] {
        &self.hashes
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RatingsUpdate {
    Set { hash: Hash, value: RatingValue },
    Clear { hash: Hash },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentUpdate {
    Files(FilesUpdate),
    Mappings(MappingsUpdate),
    Ratings(RatingsUpdate),
}

impl ContentUpdate {
    pub fn delete_files(hashes: Vec<Hash>) -> Self {
        ContentUpdate::Files(FilesUpdate::Delete(hashes))
    }

    pub fn archive(hashes: Vec<Hash>) -> Self {
        ContentUpdate::Files(FilesUpdate::Archive(hashes))
    }

    pub fn inbox(hashes: Vec<Hash>) -> Self {
        ContentUpdate::Files(FilesUpdate::Inbox(hashes))
    }

    pub fn add_mapping(tag: &str, hashes: Vec<Hash>) -> Result<Self> {
        Ok(ContentUpdate::Mappings(MappingsUpdate::new(MappingAction::Add, tag, hashes)?))
    }

    pub fn delete_mapping(tag: &str, hashes: Vec<Hash>) -> Result<Self> {
        Ok(ContentUpdate::Mappings(MappingsUpdate::new(MappingAction::Delete, tag, hashes)?))
    }

    pub fn set_rating(hash: Hash, value: RatingValue) -> Self {
        ContentUpdate::Ratings(RatingsUpdate::Set { hash, value })
    }

    pub fn data_type(&self) -> ContentDataType {
        match self {
            ContentUpdate::Files(_) => ContentDataType::Files,
            ContentUpdate::Mappings(_) => ContentDataType::Mappings,
            ContentUpdate::Ratings(_) => ContentDataType::Ratings,
        }
    }

    /// Whether this update touches pending (upload queue) state.
    pub fn is_pending_action(&self) -> bool {
        match self {
            ContentUpdate::Files(FilesUpdate::Pend(_) | FilesUpdate::RescindPend(_)) => true,
            ContentUpdate::Mappings(m) => {
                matches!(m.action(), MappingAction::Pend | MappingAction::RescindPend)
            }
            _ => false,
        }
    }
}
