pub const SCHEMA: &str = r#"
-- Services: local stores, repositories and rating services.
-- Combined services are synthesized on read and never stored.
CREATE TABLE IF NOT EXISTS services (
    service_id INTEGER PRIMARY KEY AUTOINCREMENT,
    service_key BLOB NOT NULL UNIQUE,
    service_type TEXT NOT NULL,
    name TEXT NOT NULL,
    config TEXT NOT NULL              -- JSON ServiceConfig
);

CREATE INDEX IF NOT EXISTS idx_services_type ON services(service_type);

-- Keys of deleted services, never handed out again
CREATE TABLE IF NOT EXISTS retired_service_keys (
    service_key BLOB PRIMARY KEY,
    retired_at INTEGER NOT NULL
);

-- Every content hash the database has heard of
CREATE TABLE IF NOT EXISTS hashes (
    hash_id INTEGER PRIMARY KEY AUTOINCREMENT,
    hash BLOB NOT NULL UNIQUE         -- sha256, 32 bytes
);

-- File metadata, present once the file itself has been seen
CREATE TABLE IF NOT EXISTS files_info (
    hash_id INTEGER PRIMARY KEY,
    size INTEGER NOT NULL,
    mime INTEGER NOT NULL,
    width INTEGER,
    height INTEGER,
    duration INTEGER,                 -- milliseconds
    num_frames INTEGER,
    num_words INTEGER,
    FOREIGN KEY (hash_id) REFERENCES hashes(hash_id)
);

CREATE INDEX IF NOT EXISTS idx_files_info_mime ON files_info(mime);
CREATE INDEX IF NOT EXISTS idx_files_info_size ON files_info(size);

-- Secondary hashes of locally imported bytes
CREATE TABLE IF NOT EXISTS local_hashes (
    hash_id INTEGER PRIMARY KEY,
    md5 BLOB NOT NULL,
    FOREIGN KEY (hash_id) REFERENCES hashes(hash_id)
);

CREATE TABLE IF NOT EXISTS perceptual_hashes (
    hash_id INTEGER PRIMARY KEY,
    phash BLOB NOT NULL,
    FOREIGN KEY (hash_id) REFERENCES hashes(hash_id)
);

-- Presence of a row means inbox; absence means archived
CREATE TABLE IF NOT EXISTS file_inbox (
    hash_id INTEGER PRIMARY KEY,
    FOREIGN KEY (hash_id) REFERENCES hashes(hash_id)
);

-- Files current in a file service, with the time they arrived there
CREATE TABLE IF NOT EXISTS current_files (
    service_id INTEGER NOT NULL,
    hash_id INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,       -- unix seconds
    PRIMARY KEY (service_id, hash_id),
    FOREIGN KEY (service_id) REFERENCES services(service_id),
    FOREIGN KEY (hash_id) REFERENCES hashes(hash_id)
);

CREATE INDEX IF NOT EXISTS idx_current_files_hash ON current_files(hash_id);

-- Files queued for upload to a file repository
CREATE TABLE IF NOT EXISTS pending_files (
    service_id INTEGER NOT NULL,
    hash_id INTEGER NOT NULL,
    PRIMARY KEY (service_id, hash_id),
    FOREIGN KEY (service_id) REFERENCES services(service_id),
    FOREIGN KEY (hash_id) REFERENCES hashes(hash_id)
);

CREATE TABLE IF NOT EXISTS tags (
    tag_id INTEGER PRIMARY KEY AUTOINCREMENT,
    tag TEXT NOT NULL UNIQUE
);

-- (service, tag, file) mappings; status 0 = current, 1 = pending
CREATE TABLE IF NOT EXISTS mappings (
    service_id INTEGER NOT NULL,
    tag_id INTEGER NOT NULL,
    hash_id INTEGER NOT NULL,
    status INTEGER NOT NULL,
    PRIMARY KEY (service_id, tag_id, hash_id, status),
    FOREIGN KEY (service_id) REFERENCES services(service_id),
    FOREIGN KEY (tag_id) REFERENCES tags(tag_id),
    FOREIGN KEY (hash_id) REFERENCES hashes(hash_id)
);

CREATE INDEX IF NOT EXISTS idx_mappings_hash ON mappings(hash_id);
CREATE INDEX IF NOT EXISTS idx_mappings_tag ON mappings(tag_id);

CREATE TABLE IF NOT EXISTS ratings (
    service_id INTEGER NOT NULL,
    hash_id INTEGER NOT NULL,
    rating REAL NOT NULL,
    PRIMARY KEY (service_id, hash_id),
    FOREIGN KEY (service_id) REFERENCES services(service_id),
    FOREIGN KEY (hash_id) REFERENCES hashes(hash_id)
);
"#;

/// Mapping status codes stored in `mappings.status`.
pub const STATUS_CURRENT: i64 = 0;
pub const STATUS_PENDING: i64 = 1;
