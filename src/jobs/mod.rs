//! Serialized job execution against the catalogue.
//!
//! Every read and write runs on one worker thread that owns the
//! [`Database`]. Callers submit jobs by kind and action name; the worker
//! runs them one at a time, highest priority first and in submission order
//! within a priority.

pub mod scheduler;

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::PathBuf;

pub use scheduler::{JobHandle, JobScheduler, SchedulerConfig, Submitted};

use crate::content::ServiceUpdates;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::import::{ContentStore, ImportOptions, ImportOutcome};
use crate::media::{FileId, MediaResult};
use crate::predicates::SearchContext;
use crate::services::{Service, ServiceEdit, ServiceIdentifier, ServiceKey, ServiceType};

/// Sequence number assigned at submission. Defines FIFO order within a
/// priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Read,
    Write,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Read => "read",
            JobKind::Write => "write",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// Registered actions. Names are the public contract of [`JobScheduler::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    FileQueryIds,
    ServiceIdentifiers,
    Services,
    Service,
    MediaResults,
    ImportFile,
    ContentUpdates,
    UpdateServices,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::FileQueryIds,
        Action::ServiceIdentifiers,
        Action::Services,
        Action::Service,
        Action::MediaResults,
        Action::ImportFile,
        Action::ContentUpdates,
        Action::UpdateServices,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Action::FileQueryIds => "file_query_ids",
            Action::ServiceIdentifiers => "service_identifiers",
            Action::Services => "services",
            Action::Service => "service",
            Action::MediaResults => "media_results",
            Action::ImportFile => "import_file",
            Action::ContentUpdates => "content_updates",
            Action::UpdateServices => "update_services",
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            Action::FileQueryIds
            | Action::ServiceIdentifiers
            | Action::Services
            | Action::Service
            | Action::MediaResults => JobKind::Read,
            Action::ImportFile | Action::ContentUpdates | Action::UpdateServices => JobKind::Write,
        }
    }

    /// Resolve an action by kind and name.
    pub fn lookup(kind: JobKind, name: &str) -> Result<Self> {
        Action::ALL
            .iter()
            .copied()
            .find(|action| action.kind() == kind && action.name() == name)
            .ok_or_else(|| Error::UnknownAction {
                kind: kind.as_str(),
                name: name.to_string(),
            })
    }

    fn expected(&self) -> &'static str {
        match self {
            Action::FileQueryIds => "Search",
            Action::ServiceIdentifiers | Action::Services => "ServiceTypes",
            Action::Service => "Service",
            Action::MediaResults => "FileIds",
            Action::ImportFile => "ImportFile",
            Action::ContentUpdates => "ContentUpdates",
            Action::UpdateServices => "EditLog",
        }
    }

    /// Reject a payload that does not belong to this action.
    pub fn check_args(&self, args: &JobArgs) -> Result<()> {
        let fits = matches!(
            (self, args),
            (Action::FileQueryIds, JobArgs::Search(_))
                | (Action::ServiceIdentifiers | Action::Services, JobArgs::ServiceTypes(_))
                | (Action::Service, JobArgs::Service(_))
                | (Action::MediaResults, JobArgs::FileIds(_))
                | (Action::ImportFile, JobArgs::ImportFile { .. })
                | (Action::ContentUpdates, JobArgs::ContentUpdates(_))
                | (Action::UpdateServices, JobArgs::EditLog(_))
        );
        if fits {
            Ok(())
        } else {
            Err(Error::InvalidArguments {
                action: self.name(),
                expected: self.expected(),
            })
        }
    }
}

/// Argument payload of a job.
#[derive(Debug, Clone)]
pub enum JobArgs {
    Search(SearchContext),
    ServiceTypes(BTreeSet<ServiceType>),
    Service(ServiceKey),
    FileIds(Vec<FileId>),
    ImportFile { path: PathBuf, options: ImportOptions },
    ContentUpdates(ServiceUpdates),
    EditLog(Vec<ServiceEdit>),
}

/// Result payload of a completed job.
#[derive(Debug, Clone)]
pub enum JobOutput {
    FileIds(HashSet<FileId>),
    ServiceIdentifiers(BTreeSet<ServiceIdentifier>),
    Services(Vec<Service>),
    Service(Service),
    MediaResults(Vec<MediaResult>),
    Import(ImportOutcome),
    Done,
}

impl JobOutput {
    pub fn into_file_ids(self) -> Option<HashSet<FileId>> {
        match self {
            JobOutput::FileIds(ids) => Some(ids),
            _ => None,
        }
    }

    pub fn into_service_identifiers(self) -> Option<BTreeSet<ServiceIdentifier>> {
        match self {
            JobOutput::ServiceIdentifiers(ids) => Some(ids),
            _ => None,
        }
    }

    pub fn into_services(self) -> Option<Vec<Service>> {
        match self {
            JobOutput::Services(services) => Some(services),
            _ => None,
        }
    }

    pub fn into_service(self) -> Option<Service> {
        match self {
            JobOutput::Service(service) => Some(service),
            _ => None,
        }
    }

    pub fn into_media_results(self) -> Option<Vec<MediaResult>> {
        match self {
            JobOutput::MediaResults(results) => Some(results),
            _ => None,
        }
    }

    pub fn into_import(self) -> Option<ImportOutcome> {
        match self {
            JobOutput::Import(outcome) => Some(outcome),
            _ => None,
        }
    }
}

/// Run one action on the worker's database.
pub(crate) fn execute(
    db: &mut Database,
    store: &ContentStore,
    action: Action,
    args: JobArgs,
) -> Result<JobOutput> {
    match (action, args) {
        (Action::FileQueryIds, JobArgs::Search(context)) => {
            db.file_query_ids(&context).map(JobOutput::FileIds)
        }
        (Action::ServiceIdentifiers, JobArgs::ServiceTypes(types)) => {
            db.service_identifiers(&types).map(JobOutput::ServiceIdentifiers)
        }
        (Action::Services, JobArgs::ServiceTypes(types)) => {
            db.services(&types).map(JobOutput::Services)
        }
        (Action::Service, JobArgs::Service(key)) => db.service(&key).map(JobOutput::Service),
        (Action::MediaResults, JobArgs::FileIds(ids)) => {
            db.media_results(&ids).map(JobOutput::MediaResults)
        }
        (Action::ImportFile, JobArgs::ImportFile { path, options }) => {
            store.import(db, &path, &options).map(JobOutput::Import)
        }
        (Action::ContentUpdates, JobArgs::ContentUpdates(updates)) => {
            db.apply_content_updates(&updates).map(|_| JobOutput::Done)
        }
        (Action::UpdateServices, JobArgs::EditLog(entries)) => {
            db.apply_edit_log(&entries).map(|_| JobOutput::Done)
        }
        (action, _) => Err(Error::InvalidArguments {
            action: action.name(),
            expected: action.expected(),
        }),
    }
}
