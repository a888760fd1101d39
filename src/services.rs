//! Service identity and configuration types.
//!
//! A service is a typed endpoint for file, tag or rating data. Its key is
//! immutable once created; name and configuration are editable through the
//! edit log applied by [`Database::apply_edit_log`](crate::db::Database::apply_edit_log).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Opaque, immutable service key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey(Vec<u8>);

impl ServiceKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        ServiceKey(bytes.into())
    }

    /// A fresh random 32-byte key.
    pub fn generate() -> Self {
        ServiceKey(rand::random::<[u8; 32]>().to_vec())
    }

    pub fn local_file() -> Self {
        ServiceKey::new(b"local files".to_vec())
    }

    pub fn local_tag() -> Self {
        ServiceKey::new(b"local tags".to_vec())
    }

    pub fn combined_file() -> Self {
        ServiceKey::new(b"all known files".to_vec())
    }

    pub fn combined_tag() -> Self {
        ServiceKey::new(b"all known tags".to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.0.is_empty() && self.0.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            f.write_str(&String::from_utf8_lossy(&self.0))
        } else {
            for byte in &self.0 {
                write!(f, "{:02x}", byte)?;
            }
            Ok(())
        }
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceKey({})", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceType {
    LocalFile,
    LocalTag,
    CombinedFile,
    CombinedTag,
    TagRepository,
    FileRepository,
    LocalRatingLike,
    LocalRatingNumerical,
}

impl ServiceType {
    pub const ALL: [ServiceType; 8] = [
        ServiceType::LocalFile,
        ServiceType::LocalTag,
        ServiceType::CombinedFile,
        ServiceType::CombinedTag,
        ServiceType::TagRepository,
        ServiceType::FileRepository,
        ServiceType::LocalRatingLike,
        ServiceType::LocalRatingNumerical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::LocalFile => "local_file",
            ServiceType::LocalTag => "local_tag",
            ServiceType::CombinedFile => "combined_file",
            ServiceType::CombinedTag => "combined_tag",
            ServiceType::TagRepository => "tag_repository",
            ServiceType::FileRepository => "file_repository",
            ServiceType::LocalRatingLike => "local_rating_like",
            ServiceType::LocalRatingNumerical => "local_rating_numerical",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        ServiceType::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    /// Virtual aggregates. Never stored, never edited.
    pub fn is_combined(&self) -> bool {
        matches!(self, ServiceType::CombinedFile | ServiceType::CombinedTag)
    }

    /// The singleton local file and tag stores.
    pub fn is_local_store(&self) -> bool {
        matches!(self, ServiceType::LocalFile | ServiceType::LocalTag)
    }

    pub fn is_repository(&self) -> bool {
        matches!(self, ServiceType::TagRepository | ServiceType::FileRepository)
    }

    pub fn is_file_service(&self) -> bool {
        matches!(self, ServiceType::LocalFile | ServiceType::FileRepository)
    }

    pub fn is_tag_service(&self) -> bool {
        matches!(self, ServiceType::LocalTag | ServiceType::TagRepository)
    }

    pub fn is_rating_service(&self) -> bool {
        matches!(self, ServiceType::LocalRatingLike | ServiceType::LocalRatingNumerical)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key, type and display name of a service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceIdentifier {
    pub key: ServiceKey,
    pub service_type: ServiceType,
    pub name: String,
}

impl ServiceIdentifier {
    pub fn new(key: ServiceKey, service_type: ServiceType, name: impl Into<String>) -> Self {
        Self {
            key,
            service_type,
            name: name.into(),
        }
    }

    pub fn local_file() -> Self {
        Self::new(ServiceKey::local_file(), ServiceType::LocalFile, "local files")
    }

    pub fn local_tag() -> Self {
        Self::new(ServiceKey::local_tag(), ServiceType::LocalTag, "local tags")
    }

    pub fn combined_file() -> Self {
        Self::new(ServiceKey::combined_file(), ServiceType::CombinedFile, "all known files")
    }

    pub fn combined_tag() -> Self {
        Self::new(ServiceKey::combined_tag(), ServiceType::CombinedTag, "all known tags")
    }
}

/// Connection details for a remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub host: String,
    pub port: u16,
    pub access_key: Option<Vec<u8>>,
}

impl Credentials {
    pub fn new(host: impl Into<String>, port: u16, access_key: Option<Vec<u8>>) -> Self {
        Self {
            host: host.into(),
            port,
            access_key,
        }
    }
}

/// Type-specific extra configuration as supplied in an edit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtraInfo {
    LikeLabels { like: String, dislike: String },
    NumericalBounds { lower: i64, upper: i64 },
}

/// Per-type configuration. Each arm carries exactly what its type needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceConfig {
    LocalFile,
    LocalTag,
    CombinedFile,
    CombinedTag,
    TagRepository(Credentials),
    FileRepository(Credentials),
    LocalRatingLike { like: String, dislike: String },
    LocalRatingNumerical { lower: i64, upper: i64 },
}

impl ServiceConfig {
    /// Build the configuration for a service type from the loose edit-log
    /// fields, rejecting any combination the type cannot carry.
    pub fn assemble(
        service_type: ServiceType,
        credentials: Option<Credentials>,
        extra_info: Option<ExtraInfo>,
    ) -> Result<Self> {
        let config = match (service_type, credentials, extra_info) {
            (ServiceType::LocalFile, None, None) => ServiceConfig::LocalFile,
            (ServiceType::LocalTag, None, None) => ServiceConfig::LocalTag,
            (ServiceType::CombinedFile, None, None) => ServiceConfig::CombinedFile,
            (ServiceType::CombinedTag, None, None) => ServiceConfig::CombinedTag,
            (ServiceType::TagRepository, Some(c), None) => ServiceConfig::TagRepository(c),
            (ServiceType::FileRepository, Some(c), None) => ServiceConfig::FileRepository(c),
            (ServiceType::LocalRatingLike, None, Some(ExtraInfo::LikeLabels { like, dislike })) => {
                if like.is_empty() || dislike.is_empty() || like == dislike {
                    return Err(Error::InvalidService(format!(
                        "like labels must be two distinct non-empty strings, got {:?}/{:?}",
                        like, dislike
                    )));
                }
                ServiceConfig::LocalRatingLike { like, dislike }
            }
            (
                ServiceType::LocalRatingNumerical,
                None,
                Some(ExtraInfo::NumericalBounds { lower, upper }),
            ) => {
                if lower >= upper {
                    return Err(Error::InvalidService(format!(
                        "numerical bounds must satisfy lower < upper, got {}..{}",
                        lower, upper
                    )));
                }
                ServiceConfig::LocalRatingNumerical { lower, upper }
            }
            (ty, credentials, extra) => {
                return Err(Error::InvalidService(format!(
                    "{} service cannot take credentials={} extra_info={}",
                    ty,
                    credentials.is_some(),
                    extra.is_some()
                )));
            }
        };
        Ok(config)
    }

    pub fn service_type(&self) -> ServiceType {
        match self {
            ServiceConfig::LocalFile => ServiceType::LocalFile,
            ServiceConfig::LocalTag => ServiceType::LocalTag,
            ServiceConfig::CombinedFile => ServiceType::CombinedFile,
            ServiceConfig::CombinedTag => ServiceType::CombinedTag,
            ServiceConfig::TagRepository(_) => ServiceType::TagRepository,
            ServiceConfig::FileRepository(_) => ServiceType::FileRepository,
            ServiceConfig::LocalRatingLike { .. } => ServiceType::LocalRatingLike,
            ServiceConfig::LocalRatingNumerical { .. } => ServiceType::LocalRatingNumerical,
        }
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        match self {
            ServiceConfig::TagRepository(c) | ServiceConfig::FileRepository(c) => Some(c),
            _ => None,
        }
    }

    pub fn extra_info(&self) -> Option<ExtraInfo> {
        match self {
            ServiceConfig::LocalRatingLike { like, dislike } => Some(ExtraInfo::LikeLabels {
                like: like.clone(),
                dislike: dislike.clone(),
            }),
            ServiceConfig::LocalRatingNumerical { lower, upper } => {
                Some(ExtraInfo::NumericalBounds {
                    lower: *lower,
                    upper: *upper,
                })
            }
            _ => None,
        }
    }

    /// Check a rating against this service and return its stored form.
    pub fn encode_rating(&self, value: &RatingValue) -> Result<f64> {
        match (self, value) {
            (ServiceConfig::LocalRatingLike { like, dislike }, RatingValue::Label(label)) => {
                if label == like {
                    Ok(1.0)
                } else if label == dislike {
                    Ok(0.0)
                } else {
                    Err(Error::InvalidRating(format!(
                        "{:?} is neither {:?} nor {:?}",
                        label, like, dislike
                    )))
                }
            }
            (ServiceConfig::LocalRatingNumerical { lower, upper }, RatingValue::Numerical(n)) => {
                if n < lower || n > upper {
                    Err(Error::InvalidRating(format!(
                        "{} is outside {}..={}",
                        n, lower, upper
                    )))
                } else {
                    Ok(*n as f64)
                }
            }
            (config, value) => Err(Error::InvalidRating(format!(
                "{:?} does not fit a {} service",
                value,
                config.service_type()
            ))),
        }
    }

    pub fn decode_rating(&self, stored: f64) -> Option<RatingValue> {
        match self {
            ServiceConfig::LocalRatingLike { like, dislike } => Some(RatingValue::Label(
                if stored >= 0.5 { like.clone() } else { dislike.clone() },
            )),
            ServiceConfig::LocalRatingNumerical { .. } => {
                Some(RatingValue::Numerical(stored.round() as i64))
            }
            _ => None,
        }
    }
}

/// A rating as the caller sees it: one of a like service's two labels, or
/// an integer within a numerical service's bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RatingValue {
    Label(String),
    Numerical(i64),
}

/// Full service record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub identifier: ServiceIdentifier,
    pub config: ServiceConfig,
}

impl Service {
    pub fn key(&self) -> &ServiceKey {
        &self.identifier.key
    }

    pub fn service_type(&self) -> ServiceType {
        self.identifier.service_type
    }
}

/// How an edit treats the service key. Always explicit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyUpdate {
    Keep,
    Replace(ServiceKey),
}

/// Replacement attributes for an edited service. `credentials` and
/// `extra_info` left as `None` keep the service's current values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditedService {
    pub key: KeyUpdate,
    pub name: String,
    pub credentials: Option<Credentials>,
    pub extra_info: Option<ExtraInfo>,
}

impl EditedService {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            key: KeyUpdate::Keep,
            name: name.into(),
            credentials: None,
            extra_info: None,
        }
    }

    /// The identifier this edit produces for `old`.
    pub fn identifier(&self, old: &ServiceIdentifier) -> ServiceIdentifier {
        let key = match &self.key {
            KeyUpdate::Keep => old.key.clone(),
            KeyUpdate::Replace(key) => key.clone(),
        };
        ServiceIdentifier::new(key, old.service_type, self.name.clone())
    }
}

/// One entry of an ordered service edit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEdit {
    Add {
        identifier: ServiceIdentifier,
        credentials: Option<Credentials>,
        extra_info: Option<ExtraInfo>,
    },
    Edit {
        old: ServiceIdentifier,
        new: EditedService,
    },
    Delete(ServiceIdentifier),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_matches_type() {
        let creds = Credentials::new("example_host", 80, Some(vec![1, 2, 3]));
        let config =
            ServiceConfig::assemble(ServiceType::TagRepository, Some(creds.clone()), None).unwrap();
        assert_eq!(config.credentials(), Some(&creds));
        assert_eq!(config.service_type(), ServiceType::TagRepository);

        let err = ServiceConfig::assemble(ServiceType::TagRepository, None, None);
        assert!(matches!(err, Err(Error::InvalidService(_))));

        let err = ServiceConfig::assemble(
            ServiceType::LocalRatingLike,
            Some(creds),
            Some(ExtraInfo::LikeLabels { like: "love".into(), dislike: "hate".into() }),
        );
        assert!(matches!(err, Err(Error::InvalidService(_))));

        let err = ServiceConfig::assemble(
            ServiceType::LocalRatingNumerical,
            None,
            Some(ExtraInfo::NumericalBounds { lower: 5, upper: 1 }),
        );
        assert!(matches!(err, Err(Error::InvalidService(_))));
    }

    #[test]
    fn test_rating_validation() {
        let like = ServiceConfig::LocalRatingLike { like: "love".into(), dislike: "hate".into() };
        assert_eq!(like.encode_rating(&RatingValue::Label("love".into())).unwrap(), 1.0);
        assert_eq!(like.encode_rating(&RatingValue::Label("hate".into())).unwrap(), 0.0);
        assert!(like.encode_rating(&RatingValue::Label("meh".into())).is_err());
        assert!(like.encode_rating(&RatingValue::Numerical(1)).is_err());
        assert_eq!(like.decode_rating(1.0), Some(RatingValue::Label("love".into())));

        let numerical = ServiceConfig::LocalRatingNumerical { lower: 1, upper: 5 };
        assert_eq!(numerical.encode_rating(&RatingValue::Numerical(5)).unwrap(), 5.0);
        assert!(numerical.encode_rating(&RatingValue::Numerical(0)).is_err());
        assert!(numerical.encode_rating(&RatingValue::Numerical(6)).is_err());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(ServiceKey::local_file().to_string(), "local files");
        assert_eq!(ServiceKey::new(vec![0xab, 0x01]).to_string(), "ab01");
        assert_ne!(ServiceKey::generate(), ServiceKey::generate());
    }

    #[test]
    fn test_edited_identifier() {
        let old = ServiceIdentifier::new(ServiceKey::generate(), ServiceType::TagRepository, "repo");
        let kept = EditedService::rename("better").identifier(&old);
        assert_eq!(kept.key, old.key);
        assert_eq!(kept.name, "better");

        let new_key = ServiceKey::generate();
        let edit = EditedService { key: KeyUpdate::Replace(new_key.clone()), ..EditedService::rename("x") };
        assert_eq!(edit.identifier(&old).key, new_key);
        assert_eq!(edit.identifier(&old).service_type, ServiceType::TagRepository);
    }
}
