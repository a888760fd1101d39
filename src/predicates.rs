//! System predicates and search contexts.
//!
//! Every predicate kind is its own variant carrying only the operands valid
//! for it. Operand invariants that the types cannot express (non-empty mime
//! sets, non-zero ratio units, sane similarity distances) are checked when a
//! [`SearchContext`] is built, so evaluation never sees a malformed query.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::media::{FileId, Hash, Mime, MimeGroup};
use crate::services::{RatingValue, ServiceKey};

/// `≈` band for AGE, as a fraction of the requested span.
pub const AGE_TOLERANCE: f64 = 0.15;
/// `≈` band for DURATION, as a fraction of the operand.
pub const DURATION_TOLERANCE: f64 = 0.05;
/// `≈` band for WIDTH and HEIGHT, as a fraction of the operand.
pub const DIMENSION_TOLERANCE: f64 = 0.05;
/// `≈` band for RATIO, as a fraction of the operand ratio.
pub const RATIO_TOLERANCE: f64 = 0.05;
/// `≈` band for SIZE, as a fraction of the operand in bytes.
pub const SIZE_TOLERANCE: f64 = 0.15;
/// `≈` band for NUM_WORDS and NUM_TAGS. Collapses to an exact match at 0.
pub const COUNT_TOLERANCE: f64 = 0.05;

/// Hamming distances are measured over at most this many bits.
pub const MAX_SIMILARITY_DISTANCE: u32 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Less,
    Equal,
    Greater,
    /// Equal within the predicate's documented tolerance.
    Approx,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Less => "<",
            Operator::Equal => "=",
            Operator::Greater => ">",
            Operator::Approx => "\u{2248}",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "<" => Ok(Operator::Less),
            "=" => Ok(Operator::Equal),
            ">" => Ok(Operator::Greater),
            "\u{2248}" | "~" => Ok(Operator::Approx),
            other => Err(Error::InvalidPredicate(format!("unknown operator {:?}", other))),
        }
    }

    /// Inclusive `[low, high]` band for `≈` around `value`.
    pub fn approx_band(value: f64, tolerance: f64) -> (f64, f64) {
        (value * (1.0 - tolerance), value * (1.0 + tolerance))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Rating comparisons have no tolerance band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RatingOperator {
    Less,
    Equal,
    Greater,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AgeSpan {
    pub years: u32,
    pub months: u32,
    pub days: u32,
    pub hours: u32,
}

impl AgeSpan {
    pub fn new(years: u32, months: u32, days: u32, hours: u32) -> Self {
        Self { years, months, days, hours }
    }

    /// Span in seconds. Years count as 365 days and months as 30.
    pub fn seconds(&self) -> i64 {
        const HOUR: i64 = 3600;
        const DAY: i64 = 24 * HOUR;
        self.years as i64 * 365 * DAY
            + self.months as i64 * 30 * DAY
            + self.days as i64 * DAY
            + self.hours as i64 * HOUR
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SizeUnit {
    B,
    KB,
    MB,
    GB,
}

impl SizeUnit {
    pub fn multiplier(&self) -> u64 {
        match self {
            SizeUnit::B => 1,
            SizeUnit::KB => 1024,
            SizeUnit::MB => 1024 * 1024,
            SizeUnit::GB => 1024 * 1024 * 1024,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "" | "B" => Some(SizeUnit::B),
            "KB" => Some(SizeUnit::KB),
            "MB" => Some(SizeUnit::MB),
            "GB" => Some(SizeUnit::GB),
            _ => None,
        }
    }
}

/// Width:height ratio with non-zero units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ratio {
    width: u32,
    height: u32,
}

impl Ratio {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidPredicate(format!(
                "ratio units must be non-zero, got {}:{}",
                width, height
            )));
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn value(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

/// Non-empty set of mimes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MimeSet(BTreeSet<Mime>);

impl MimeSet {
    pub fn new(mimes: impl IntoIterator<Item = Mime>) -> Result<Self> {
        let set: BTreeSet<Mime> = mimes.into_iter().collect();
        if set.is_empty() {
            return Err(Error::InvalidPredicate("mime predicate needs at least one mime".into()));
        }
        Ok(MimeSet(set))
    }

    pub fn contains(&self, mime: Mime) -> bool {
        self.0.contains(&mime)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mime> {
        self.0.iter()
    }
}

impl From<Mime> for MimeSet {
    fn from(mime: Mime) -> Self {
        MimeSet(BTreeSet::from([mime]))
    }
}

impl From<MimeGroup> for MimeSet {
    fn from(group: MimeGroup) -> Self {
        MimeSet(group.mimes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileServiceStatus {
    Current,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Archive,
    Inbox,
    Everything,
    Local,
    NotLocal,
    Age {
        operator: Operator,
        span: AgeSpan,
    },
    /// Milliseconds. Absent durations compare as 0.
    Duration {
        operator: Operator,
        millis: u64,
    },
    /// File has (`present`) or lacks a file-service row of `status`.
    FileService {
        present: bool,
        status: FileServiceStatus,
        service: ServiceKey,
    },
    Hash(Hash),
    Height {
        operator: Operator,
        pixels: u32,
    },
    Width {
        operator: Operator,
        pixels: u32,
    },
    Mime(MimeSet),
    NumTags {
        operator: Operator,
        count: u32,
    },
    /// Absent word counts compare as 0.
    NumWords {
        operator: Operator,
        count: u32,
    },
    Ratio {
        operator: Operator,
        ratio: Ratio,
    },
    SimilarTo {
        hash: Hash,
        max_distance: u32,
    },
    Size {
        operator: Operator,
        value: u64,
        unit: SizeUnit,
    },
    /// Recorded for the truncation stage; never filters.
    Limit(u64),
    Tag {
        tag: String,
        inclusive: bool,
    },
    Rating {
        service: ServiceKey,
        operator: RatingOperator,
        value: RatingValue,
    },
}

impl Predicate {
    pub fn tag(tag: &str, inclusive: bool) -> Result<Self> {
        Ok(Predicate::Tag {
            tag: clean_tag(tag)?,
            inclusive,
        })
    }

    pub fn similar_to(hash: Hash, max_distance: u32) -> Result<Self> {
        let predicate = Predicate::SimilarTo { hash, max_distance };
        predicate.validate()?;
        Ok(predicate)
    }

    /// Reject operands that the variant types cannot rule out on their own.
    pub fn validate(&self) -> Result<()> {
        match self {
            Predicate::SimilarTo { max_distance, .. } if *max_distance > MAX_SIMILARITY_DISTANCE => {
                Err(Error::InvalidPredicate(format!(
                    "similarity distance {} exceeds {}",
                    max_distance, MAX_SIMILARITY_DISTANCE
                )))
            }
            Predicate::Tag { tag, .. } if clean_tag(tag)? != *tag => Err(Error::InvalidPredicate(
                format!("tag {:?} is not in canonical form", tag),
            )),
            Predicate::Size { value, unit, .. } if value.checked_mul(unit.multiplier()).is_none() => {
                Err(Error::InvalidPredicate(format!("size {} {:?} overflows", value, unit)))
            }
            _ => Ok(()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Predicate::Archive => "archive",
            Predicate::Inbox => "inbox",
            Predicate::Everything => "everything",
            Predicate::Local => "local",
            Predicate::NotLocal => "not_local",
            Predicate::Age { .. } => "age",
            Predicate::Duration { .. } => "duration",
            Predicate::FileService { .. } => "file_service",
            Predicate::Hash(_) => "hash",
            Predicate::Height { .. } => "height",
            Predicate::Width { .. } => "width",
            Predicate::Mime(_) => "mime",
            Predicate::NumTags { .. } => "num_tags",
            Predicate::NumWords { .. } => "num_words",
            Predicate::Ratio { .. } => "ratio",
            Predicate::SimilarTo { .. } => "similar_to",
            Predicate::Size { .. } => "size",
            Predicate::Limit(_) => "limit",
            Predicate::Tag { .. } => "tag",
            Predicate::Rating { .. } => "rating",
        }
    }
}

/// Trim and lowercase a tag. Empty tags are rejected.
pub fn clean_tag(tag: &str) -> Result<String> {
    let cleaned = tag.trim().to_lowercase();
    if cleaned.is_empty() {
        return Err(Error::InvalidPredicate("empty tag".into()));
    }
    Ok(cleaned)
}

/// Compact textual form used by the command line, e.g. `inbox`,
/// `size>10kb`, `width~200`, `ratio=16:9`, `mime=image/png`, `mime=images`,
/// `age<7d`, `tag=car`, `-tag=car`, `hash=<hex>`, `limit=50`.
impl FromStr for Predicate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s {
            "archive" => return Ok(Predicate::Archive),
            "inbox" => return Ok(Predicate::Inbox),
            "everything" => return Ok(Predicate::Everything),
            "local" => return Ok(Predicate::Local),
            "not_local" => return Ok(Predicate::NotLocal),
            _ => {}
        }

        let split = s
            .char_indices()
            .find(|(_, c)| matches!(c, '<' | '=' | '>' | '~' | '\u{2248}'))
            .ok_or_else(|| Error::InvalidPredicate(format!("cannot parse predicate {:?}", s)))?;
        let (name, rest) = s.split_at(split.0);
        let op_len = split.1.len_utf8();
        let operator = Operator::parse(&rest[..op_len])?;
        let operand = rest[op_len..].trim();
        let invalid = || Error::InvalidPredicate(format!("bad operand in {:?}", s));
        let number = |text: &str| text.parse::<u64>().map_err(|_| invalid());
        let small = |text: &str| u32::try_from(number(text)?).map_err(|_| invalid());

        let predicate = match name.trim() {
            "size" => {
                let digits = operand.trim_end_matches(|c: char| c.is_ascii_alphabetic());
                let unit = SizeUnit::parse(&operand[digits.len()..]).ok_or_else(invalid)?;
                Predicate::Size { operator, value: number(digits)?, unit }
            }
            "width" => Predicate::Width { operator, pixels: small(operand)? },
            "height" => Predicate::Height { operator, pixels: small(operand)? },
            "duration" => Predicate::Duration { operator, millis: number(operand)? },
            "num_tags" => Predicate::NumTags { operator, count: small(operand)? },
            "num_words" => Predicate::NumWords { operator, count: small(operand)? },
            "ratio" => {
                let (w, h) = operand.split_once(':').ok_or_else(invalid)?;
                Predicate::Ratio {
                    operator,
                    ratio: Ratio::new(small(w)?, small(h)?)?,
                }
            }
            "age" => {
                if !operand.is_ascii() {
                    return Err(invalid());
                }
                let (digits, unit) = operand.split_at(operand.len().saturating_sub(1));
                let n = small(digits)?;
                let span = match unit {
                    "y" => AgeSpan::new(n, 0, 0, 0),
                    "m" => AgeSpan::new(0, n, 0, 0),
                    "d" => AgeSpan::new(0, 0, n, 0),
                    "h" => AgeSpan::new(0, 0, 0, n),
                    _ => return Err(invalid()),
                };
                Predicate::Age { operator, span }
            }
            "mime" if operator == Operator::Equal => {
                let set = match operand {
                    "images" => MimeSet::from(MimeGroup::Images),
                    "video" => MimeSet::from(MimeGroup::Video),
                    "audio" => MimeSet::from(MimeGroup::Audio),
                    "applications" => MimeSet::from(MimeGroup::Applications),
                    other => MimeSet::from(Mime::from_mime_str(other).ok_or_else(invalid)?),
                };
                Predicate::Mime(set)
            }
            "hash" if operator == Operator::Equal => {
                Predicate::Hash(Hash::from_hex(operand).ok_or_else(invalid)?)
            }
            "limit" if operator == Operator::Equal => Predicate::Limit(number(operand)?),
            "tag" if operator == Operator::Equal => Predicate::tag(operand, true)?,
            "-tag" if operator == Operator::Equal => Predicate::tag(operand, false)?,
            _ => return Err(Error::InvalidPredicate(format!("cannot parse predicate {:?}", s))),
        };
        predicate.validate()?;
        Ok(predicate)
    }
}

/// A file query: which file service to search, which tag service to count
/// tags in, and the predicates to intersect.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchContext {
    file_service: ServiceKey,
    tag_service: ServiceKey,
    include_current_tags: bool,
    include_pending_tags: bool,
    predicates: Vec<Predicate>,
}

impl SearchContext {
    pub fn new(file_service: ServiceKey, predicates: Vec<Predicate>) -> Result<Self> {
        for predicate in &predicates {
            predicate.validate()?;
        }
        Ok(Self {
            file_service,
            tag_service: ServiceKey::combined_tag(),
            include_current_tags: true,
            include_pending_tags: true,
            predicates,
        })
    }

    pub fn with_tag_service(mut self, tag_service: ServiceKey) -> Self {
        self.tag_service = tag_service;
        self
    }

    pub fn with_tag_statuses(mut self, current: bool, pending: bool) -> Self {
        self.include_current_tags = current;
        self.include_pending_tags = pending;
        self
    }

    pub fn file_service(&self) -> &ServiceKey {
        &self.file_service
    }

    pub fn tag_service(&self) -> &ServiceKey {
        &self.tag_service
    }

    pub fn include_current_tags(&self) -> bool {
        self.include_current_tags
    }

    pub fn include_pending_tags(&self) -> bool {
        self.include_pending_tags
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// The tightest LIMIT among the predicates, if any.
    pub fn limit(&self) -> Option<u64> {
        self.predicates
            .iter()
            .filter_map(|p| match p {
                Predicate::Limit(n) => Some(*n),
                _ => None,
            })
            .min()
    }

    /// Truncation stage: order ids ascending and keep at most `limit()`.
    pub fn apply_limit(&self, ids: &HashSet<FileId>) -> Vec<FileId> {
        let mut ordered: Vec<FileId> = ids.iter().copied().collect();
        ordered.sort();
        if let Some(limit) = self.limit() {
            ordered.truncate(limit as usize);
        }
        ordered
    }
}
