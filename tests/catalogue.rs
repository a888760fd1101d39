//! End-to-end behaviour of the catalogue: import, queries over every
//! system predicate, content updates and the service edit log.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tagvault::content::ContentUpdate;
use tagvault::db::Database;
use tagvault::import::{ContentStore, FileMetadata, ImportOptions, MetadataExtractor};
use tagvault::jobs::{JobArgs, JobKind, JobScheduler, Priority, SchedulerConfig, Submitted};
use tagvault::media::{Hash, Mime, MimeGroup};
use tagvault::predicates::{
    AgeSpan, FileServiceStatus, MimeSet, Operator, Predicate, Ratio, SearchContext, SizeUnit,
};
use tagvault::services::{
    Credentials, EditedService, ExtraInfo, KeyUpdate, RatingValue, ServiceEdit, ServiceIdentifier,
    ServiceKey, ServiceType,
};
use tagvault::storage::StorageLayout;
use tagvault::Error;
use tempfile::{tempdir, TempDir};

const FILE_SIZE: usize = 5270;
const PHASH: [u8; 8] = [0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0];

/// Reports every file as a 200x200 PNG.
struct StubExtractor;

impl MetadataExtractor for StubExtractor {
    fn extract(&self, _path: &Path, _bytes: &[u8]) -> anyhow::Result<FileMetadata> {
        let mut metadata = FileMetadata::new(Mime::ImagePng);
        metadata.width = Some(200);
        metadata.height = Some(200);
        metadata.perceptual_hash = Some(PHASH.to_vec());
        Ok(metadata)
    }
}

fn stub_store() -> ContentStore {
    ContentStore::new(Box::new(StubExtractor), 64)
}

fn write_file(dir: &Path, name: &str, seed: u8) -> PathBuf {
    let bytes: Vec<u8> = (0..FILE_SIZE).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect();
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

fn open(dir: &TempDir) -> Database {
    Database::open(StorageLayout::new(dir.path().join("vault"))).unwrap()
}

fn import_one(db: &mut Database, dir: &TempDir) -> Hash {
    let path = write_file(dir.path(), "subject.png", 7);
    let outcome = stub_store().import(db, &path, &ImportOptions::default()).unwrap();
    assert!(outcome.is_successful());
    outcome.hash.unwrap()
}

fn count(db: &Database, predicate: Predicate) -> usize {
    let context = SearchContext::new(ServiceKey::local_file(), vec![predicate]).unwrap();
    db.file_query_ids(&context).unwrap().len()
}

fn age(operator: Operator, span: AgeSpan) -> Predicate {
    Predicate::Age { operator, span }
}

fn size(operator: Operator, value: u64, unit: SizeUnit) -> Predicate {
    Predicate::Size { operator, value, unit }
}

fn ratio(operator: Operator, w: u32, h: u32) -> Predicate {
    Predicate::Ratio { operator, ratio: Ratio::new(w, h).unwrap() }
}

fn file_service(present: bool, status: FileServiceStatus) -> Predicate {
    Predicate::FileService { present, status, service: ServiceKey::local_file() }
}

#[test]
fn test_system_predicates_on_fresh_import() {
    let dir = tempdir().unwrap();
    let mut db = open(&dir);
    let hash = import_one(&mut db, &dir);

    let long = AgeSpan::new(1, 1, 1, 1);
    assert_eq!(count(&db, age(Operator::Less, long)), 1);
    assert_eq!(count(&db, age(Operator::Less, AgeSpan::default())), 0);
    assert_eq!(count(&db, age(Operator::Approx, long)), 0);
    assert_eq!(count(&db, age(Operator::Equal, long)), 0);
    assert_eq!(count(&db, age(Operator::Greater, long)), 0);
    assert_eq!(count(&db, age(Operator::Approx, AgeSpan::default())), 0);
    assert_eq!(count(&db, age(Operator::Greater, AgeSpan::default())), 1);

    for (operator, millis, expected) in [
        (Operator::Less, 100, 1),
        (Operator::Approx, 0, 1),
        (Operator::Equal, 0, 1),
        (Operator::Greater, 0, 0),
        (Operator::Equal, 30, 0),
    ] {
        assert_eq!(count(&db, Predicate::Duration { operator, millis }), expected, "duration {:?} {}", operator, millis);
    }

    for (operator, pixels, expected) in [
        (Operator::Less, 201, 1),
        (Operator::Less, 200, 0),
        (Operator::Approx, 200, 1),
        (Operator::Approx, 60, 0),
        (Operator::Equal, 200, 1),
        (Operator::Equal, 199, 0),
        (Operator::Greater, 199, 1),
        (Operator::Greater, 200, 0),
    ] {
        assert_eq!(count(&db, Predicate::Height { operator, pixels }), expected, "height {:?} {}", operator, pixels);
        assert_eq!(count(&db, Predicate::Width { operator, pixels }), expected, "width {:?} {}", operator, pixels);
    }

    assert_eq!(count(&db, Predicate::Mime(MimeSet::from(MimeGroup::Images))), 1);
    assert_eq!(count(&db, Predicate::Mime(MimeSet::from(Mime::ImagePng))), 1);
    assert_eq!(count(&db, Predicate::Mime(MimeSet::from(Mime::ImageJpeg))), 0);
    assert_eq!(count(&db, Predicate::Mime(MimeSet::from(MimeGroup::Video))), 0);

    assert_eq!(count(&db, Predicate::NumTags { operator: Operator::Less, count: 1 }), 1);
    assert_eq!(count(&db, Predicate::NumTags { operator: Operator::Equal, count: 0 }), 1);
    assert_eq!(count(&db, Predicate::NumTags { operator: Operator::Greater, count: 0 }), 0);

    assert_eq!(count(&db, Predicate::NumWords { operator: Operator::Less, count: 1 }), 1);
    assert_eq!(count(&db, Predicate::NumWords { operator: Operator::Approx, count: 0 }), 1);
    assert_eq!(count(&db, Predicate::NumWords { operator: Operator::Equal, count: 0 }), 1);
    assert_eq!(count(&db, Predicate::NumWords { operator: Operator::Greater, count: 1 }), 0);

    assert_eq!(count(&db, ratio(Operator::Equal, 1, 1)), 1);
    assert_eq!(count(&db, ratio(Operator::Equal, 4, 3)), 0);
    assert_eq!(count(&db, ratio(Operator::Approx, 1, 1)), 1);
    assert_eq!(count(&db, ratio(Operator::Approx, 200, 201)), 1);
    assert_eq!(count(&db, ratio(Operator::Approx, 4, 1)), 0);

    for (operator, value, unit, expected) in [
        (Operator::Less, 0, SizeUnit::B, 0),
        (Operator::Less, 5270, SizeUnit::B, 0),
        (Operator::Less, 5271, SizeUnit::B, 1),
        (Operator::Equal, 5270, SizeUnit::B, 1),
        (Operator::Equal, 0, SizeUnit::B, 0),
        (Operator::Approx, 5270, SizeUnit::B, 1),
        (Operator::Approx, 0, SizeUnit::B, 0),
        (Operator::Greater, 5270, SizeUnit::B, 0),
        (Operator::Greater, 5269, SizeUnit::B, 1),
        (Operator::Greater, 0, SizeUnit::B, 1),
        (Operator::Greater, 0, SizeUnit::KB, 1),
        (Operator::Greater, 0, SizeUnit::MB, 1),
        (Operator::Greater, 0, SizeUnit::GB, 1),
    ] {
        assert_eq!(count(&db, size(operator, value, unit)), expected, "size {:?} {} {:?}", operator, value, unit);
    }

    let other = Hash([9; 32]);
    assert_eq!(count(&db, Predicate::similar_to(hash, 0).unwrap()), 1);
    assert_eq!(count(&db, Predicate::similar_to(other, 0).unwrap()), 0);
    assert_eq!(count(&db, Predicate::Hash(hash)), 1);
    assert_eq!(count(&db, Predicate::Hash(other)), 0);

    assert_eq!(count(&db, file_service(false, FileServiceStatus::Current)), 0);
    assert_eq!(count(&db, file_service(false, FileServiceStatus::Pending)), 1);
    assert_eq!(count(&db, file_service(true, FileServiceStatus::Current)), 1);
    assert_eq!(count(&db, file_service(true, FileServiceStatus::Pending)), 0);

    for limit in [100, 1, 0] {
        assert_eq!(count(&db, Predicate::Limit(limit)), 1);
    }
    let limited = SearchContext::new(ServiceKey::local_file(), vec![Predicate::Limit(0)]).unwrap();
    assert!(limited.apply_limit(&db.file_query_ids(&limited).unwrap()).is_empty());

    assert_eq!(count(&db, Predicate::Inbox), 1);
    assert_eq!(count(&db, Predicate::Archive), 0);
    assert_eq!(count(&db, Predicate::Local), 1);
    assert_eq!(count(&db, Predicate::NotLocal), 0);
}

#[test]
fn test_archive_tag_and_delete() {
    let dir = tempdir().unwrap();
    let mut db = open(&dir);
    let hash = import_one(&mut db, &dir);

    let updates = BTreeMap::from([
        (ServiceKey::local_file(), vec![ContentUpdate::archive(vec![hash])]),
        (
            ServiceKey::local_tag(),
            vec![ContentUpdate::add_mapping("car", vec![hash]).unwrap()],
        ),
    ]);
    db.apply_content_updates(&updates).unwrap();

    assert_eq!(count(&db, Predicate::Archive), 1);
    assert_eq!(count(&db, Predicate::Inbox), 0);
    assert_eq!(count(&db, Predicate::Everything), 1);
    assert_eq!(count(&db, Predicate::Local), 1);
    assert_eq!(count(&db, Predicate::tag("Car", true).unwrap()), 1);
    assert_eq!(count(&db, Predicate::tag("car", false).unwrap()), 0);
    for (operator, n, expected) in [
        (Operator::Less, 2, 1),
        (Operator::Less, 1, 0),
        (Operator::Less, 0, 0),
        (Operator::Equal, 1, 1),
        (Operator::Equal, 0, 0),
        (Operator::Greater, 0, 1),
        (Operator::Greater, 1, 0),
    ] {
        assert_eq!(count(&db, Predicate::NumTags { operator, count: n }), expected, "num_tags {:?} {}", operator, n);
    }

    let result = db.media_result(&hash).unwrap().unwrap();
    assert!(!result.inbox());
    assert!(result.all_tags().contains("car"));

    let delete = BTreeMap::from([(ServiceKey::local_file(), vec![ContentUpdate::delete_files(vec![hash])])]);
    db.apply_content_updates(&delete).unwrap();

    for predicate in [
        Predicate::Archive,
        Predicate::Everything,
        Predicate::Inbox,
        Predicate::Local,
        Predicate::NotLocal,
    ] {
        assert_eq!(count(&db, predicate.clone()), 0, "{:?} after delete", predicate);
    }
    // Bytes stay on disk after the local row goes.
    assert!(db.layout().file_path(&hash).exists());
}

#[test]
fn test_inbox_round_trip_and_mapping_delete() {
    let dir = tempdir().unwrap();
    let mut db = open(&dir);
    let hash = import_one(&mut db, &dir);
    let local_files = |update| BTreeMap::from([(ServiceKey::local_file(), vec![update])]);
    let local_tags = |update| BTreeMap::from([(ServiceKey::local_tag(), vec![update])]);

    db.apply_content_updates(&local_files(ContentUpdate::archive(vec![hash]))).unwrap();
    assert_eq!(count(&db, Predicate::Inbox), 0);
    db.apply_content_updates(&local_files(ContentUpdate::inbox(vec![hash]))).unwrap();
    assert_eq!(count(&db, Predicate::Inbox), 1);
    assert_eq!(count(&db, Predicate::Archive), 0);

    let no_tags = Predicate::NumTags { operator: Operator::Equal, count: 0 };
    db.apply_content_updates(&local_tags(ContentUpdate::delete_mapping("never", vec![hash]).unwrap()))
        .unwrap();
    assert_eq!(count(&db, no_tags.clone()), 1);

    db.apply_content_updates(&local_tags(ContentUpdate::add_mapping("car", vec![hash]).unwrap()))
        .unwrap();
    let delete = local_tags(ContentUpdate::delete_mapping("car", vec![hash]).unwrap());
    db.apply_content_updates(&delete).unwrap();
    db.apply_content_updates(&delete).unwrap();
    assert_eq!(count(&db, no_tags), 1);
    assert_eq!(count(&db, Predicate::tag("car", true).unwrap()), 0);
}

#[test]
fn test_import_same_bytes_twice() {
    let dir = tempdir().unwrap();
    let mut db = open(&dir);
    let store = stub_store();
    let first = write_file(dir.path(), "a.png", 3);
    let second = write_file(dir.path(), "b.png", 3);

    let options = ImportOptions { generate_media_result: true, regenerate: false };
    let a = store.import(&mut db, &first, &options).unwrap();
    let b = store.import(&mut db, &second, &options).unwrap();
    assert!(!a.redundant);
    assert!(b.redundant);
    assert_eq!(a.hash, b.hash);
    assert_eq!(b.media_result.unwrap().size(), FILE_SIZE as u64);
    assert_eq!(count(&db, Predicate::Everything), 1);

    let missing = store.import(&mut db, &dir.path().join("missing.png"), &options).unwrap();
    assert!(!missing.is_successful());
    assert!(missing.hash.is_none());
}

#[test]
fn test_service_edit_log() {
    let dir = tempdir().unwrap();
    let mut db = open(&dir);

    let tag_types = BTreeSet::from([ServiceType::LocalTag, ServiceType::CombinedTag]);
    assert_eq!(
        db.service_identifiers(&tag_types).unwrap(),
        BTreeSet::from([ServiceIdentifier::local_tag(), ServiceIdentifier::combined_tag()])
    );
    let file_types = BTreeSet::from([ServiceType::LocalFile, ServiceType::CombinedFile]);
    assert_eq!(
        db.service_identifiers(&file_types).unwrap(),
        BTreeSet::from([ServiceIdentifier::local_file(), ServiceIdentifier::combined_file()])
    );

    let repo = ServiceIdentifier::new(ServiceKey::generate(), ServiceType::TagRepository, "public tag repo");
    let other_repo = ServiceIdentifier::new(ServiceKey::generate(), ServiceType::TagRepository, "private tag repo");
    let like = ServiceIdentifier::new(ServiceKey::generate(), ServiceType::LocalRatingLike, "favourites");
    let numerical = ServiceIdentifier::new(ServiceKey::generate(), ServiceType::LocalRatingNumerical, "stars");

    db.apply_edit_log(&[
        ServiceEdit::Add {
            identifier: repo.clone(),
            credentials: Some(Credentials::new("example_host", 80, Some(vec![1, 2, 3]))),
            extra_info: None,
        },
        ServiceEdit::Add {
            identifier: other_repo.clone(),
            credentials: Some(Credentials::new("example_host2", 5050, None)),
            extra_info: None,
        },
        ServiceEdit::Add {
            identifier: like.clone(),
            credentials: None,
            extra_info: Some(ExtraInfo::LikeLabels { like: "love".into(), dislike: "hate".into() }),
        },
        ServiceEdit::Add {
            identifier: numerical.clone(),
            credentials: None,
            extra_info: Some(ExtraInfo::NumericalBounds { lower: 1, upper: 5 }),
        },
    ])
    .unwrap();

    let repos = db
        .service_identifiers(&BTreeSet::from([ServiceType::TagRepository]))
        .unwrap();
    assert_eq!(repos, BTreeSet::from([repo.clone(), other_repo.clone()]));
    assert_eq!(
        db.service(&numerical.key).unwrap().config.extra_info(),
        Some(ExtraInfo::NumericalBounds { lower: 1, upper: 5 })
    );

    let new_key = ServiceKey::generate();
    let corrected = Credentials::new("corrected host", 85, None);
    db.apply_edit_log(&[
        ServiceEdit::Delete(like.clone()),
        ServiceEdit::Edit {
            old: repo.clone(),
            new: EditedService {
                key: KeyUpdate::Replace(new_key.clone()),
                name: "a better name".into(),
                credentials: Some(corrected.clone()),
                extra_info: None,
            },
        },
    ])
    .unwrap();

    assert!(matches!(db.service(&like.key), Err(Error::UnknownService(_))));
    let ratings = BTreeSet::from([ServiceType::LocalRatingLike, ServiceType::LocalRatingNumerical]);
    assert_eq!(db.service_identifiers(&ratings).unwrap(), BTreeSet::from([numerical.clone()]));
    assert_eq!(
        db.service(&other_repo.key).unwrap().config.credentials(),
        Some(&Credentials::new("example_host2", 5050, None))
    );
    assert!(matches!(db.service(&repo.key), Err(Error::UnknownService(_))));
    let edited = db.service(&new_key).unwrap();
    assert_eq!(edited.identifier.name, "a better name");
    assert_eq!(edited.config.credentials(), Some(&corrected));

    // Deleted and replaced keys stay retired.
    let reuse = db.apply_edit_log(&[ServiceEdit::Add {
        identifier: ServiceIdentifier::new(like.key.clone(), ServiceType::LocalRatingLike, "again"),
        credentials: None,
        extra_info: Some(ExtraInfo::LikeLabels { like: "yes".into(), dislike: "no".into() }),
    }]);
    assert!(matches!(reuse, Err(Error::DuplicateService(_))));

    let protected = db.apply_edit_log(&[ServiceEdit::Delete(ServiceIdentifier::local_tag())]);
    assert!(matches!(protected, Err(Error::InvalidService(_))));
}

#[test]
fn test_out_of_bounds_rating_rolls_back_batch() {
    let dir = tempdir().unwrap();
    let mut db = open(&dir);
    let hash = import_one(&mut db, &dir);

    let stars = ServiceIdentifier::new(ServiceKey::generate(), ServiceType::LocalRatingNumerical, "stars");
    db.apply_edit_log(&[ServiceEdit::Add {
        identifier: stars.clone(),
        credentials: None,
        extra_info: Some(ExtraInfo::NumericalBounds { lower: 1, upper: 5 }),
    }])
    .unwrap();

    let updates = BTreeMap::from([
        (
            ServiceKey::local_tag(),
            vec![ContentUpdate::add_mapping("sky", vec![hash]).unwrap()],
        ),
        (
            stars.key.clone(),
            vec![ContentUpdate::set_rating(hash, RatingValue::Numerical(6))],
        ),
    ]);
    assert!(matches!(db.apply_content_updates(&updates), Err(Error::InvalidRating(_))));
    assert_eq!(count(&db, Predicate::tag("sky", true).unwrap()), 0);

    let valid = BTreeMap::from([(
        stars.key.clone(),
        vec![ContentUpdate::set_rating(hash, RatingValue::Numerical(4))],
    )]);
    db.apply_content_updates(&valid).unwrap();
    let result = db.media_result(&hash).unwrap().unwrap();
    assert_eq!(result.ratings().get(&stars.key), Some(&RatingValue::Numerical(4)));
}

#[test]
fn test_scheduler_round_trip() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    let config = SchedulerConfig { shutdown_grace: Duration::ZERO };
    let scheduler = JobScheduler::start(db, stub_store(), config).unwrap();

    let path = write_file(dir.path(), "queued.png", 11);
    let args = || JobArgs::ImportFile {
        path: path.clone(),
        options: ImportOptions::default(),
    };
    let first = scheduler
        .write("import_file", Priority::Normal, args())
        .unwrap()
        .into_import()
        .unwrap();
    assert!(first.is_successful() && !first.redundant);

    let pending = match scheduler
        .submit(JobKind::Write, "import_file", Priority::Low, false, args())
        .unwrap()
    {
        Submitted::Pending(handle) => handle,
        Submitted::Done(_) => panic!("asynchronous submit completed inline"),
    };

    let context = SearchContext::new(ServiceKey::local_file(), vec![Predicate::Inbox]).unwrap();
    let ids = scheduler
        .read("file_query_ids", Priority::High, JobArgs::Search(context))
        .unwrap()
        .into_file_ids()
        .unwrap();
    assert_eq!(ids.len(), 1);

    assert!(matches!(
        scheduler.submit(JobKind::Write, "file_query_ids", Priority::High, true, JobArgs::FileIds(vec![])),
        Err(Error::UnknownAction { .. })
    ));

    scheduler.shutdown();
    assert!(pending.wait().unwrap().into_import().unwrap().redundant);
    assert!(scheduler.is_closed());
}
