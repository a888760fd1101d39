//! tagvault: an embedded, content-addressed media catalogue.
//!
//! Files are identified by the SHA-256 of their bytes, stored under a
//! sharded directory tree and described in a SQLite database. Tags, ratings
//! and file presence are tracked per service; queries combine system
//! predicates over all of it. Every database operation runs as a job on a
//! single worker thread owned by [`jobs::JobScheduler`].

pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod import;
pub mod jobs;
pub mod logging;
pub mod media;
pub mod predicates;
pub mod services;
pub mod storage;

pub use error::{Error, Result};
