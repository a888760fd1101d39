//! The job worker and its submission handle.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, error, info, info_span, warn};

use super::{execute, Action, JobArgs, JobId, JobKind, JobOutput, Priority};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::import::ContentStore;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pause after the worker stops, before shutdown returns.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_millis(250),
        }
    }
}

type Reply = oneshot::Sender<Result<JobOutput>>;

struct Job {
    id: JobId,
    priority: Priority,
    action: Action,
    args: JobArgs,
    reply: Reply,
    submitted_at: Instant,
}

impl Job {
    fn rank(&self) -> (Priority, Reverse<JobId>) {
        (self.priority, Reverse(self.id))
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}

impl PartialOrd for Job {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Job {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.rank().cmp(&other.rank())
    }
}

enum Message {
    Job(Job),
    Shutdown,
}

/// Completion handle of an asynchronously submitted job.
pub struct JobHandle {
    id: JobId,
    receiver: oneshot::Receiver<Result<JobOutput>>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Block until the job completes. Must not be called from within an
    /// async runtime; use [`JobHandle::wait_async`] there.
    pub fn wait(self) -> Result<JobOutput> {
        self.receiver.blocking_recv().unwrap_or(Err(Error::ShutDown))
    }

    pub async fn wait_async(self) -> Result<JobOutput> {
        self.receiver.await.unwrap_or(Err(Error::ShutDown))
    }
}

/// What [`JobScheduler::submit`] hands back.
pub enum Submitted {
    /// The job ran to completion before `submit` returned.
    Done(JobOutput),
    Pending(JobHandle),
}

impl Submitted {
    /// The job's output, waiting for it if it is still pending.
    pub fn wait(self) -> Result<JobOutput> {
        match self {
            Submitted::Done(output) => Ok(output),
            Submitted::Pending(handle) => handle.wait(),
        }
    }
}

struct Submitter {
    sender: mpsc::Sender<Message>,
    next_id: u64,
}

struct Shared {
    submitter: Mutex<Submitter>,
    closed: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    config: SchedulerConfig,
}

/// Cloneable handle to the single job worker.
#[derive(Clone)]
pub struct JobScheduler {
    shared: Arc<Shared>,
}

impl JobScheduler {
    /// Spawn the worker thread, handing it ownership of the database.
    pub fn start(db: Database, store: ContentStore, config: SchedulerConfig) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let closed = Arc::new(AtomicBool::new(false));

        let worker_closed = closed.clone();
        let worker = thread::Builder::new()
            .name("tagvault-db".to_string())
            .spawn(move || run_worker(db, store, receiver, worker_closed))?;

        info!("Job scheduler started");
        Ok(Self {
            shared: Arc::new(Shared {
                submitter: Mutex::new(Submitter { sender, next_id: 1 }),
                closed,
                worker: Mutex::new(Some(worker)),
                config,
            }),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Queue a job. Unknown actions and mismatched payloads are rejected
    /// here, before anything is queued. A synchronous submission blocks
    /// until the job has run.
    pub fn submit(
        &self,
        kind: JobKind,
        action: &str,
        priority: Priority,
        synchronous: bool,
        args: JobArgs,
    ) -> Result<Submitted> {
        let action = Action::lookup(kind, action)?;
        action.check_args(&args)?;

        let (reply, receiver) = oneshot::channel();
        let id = {
            let mut submitter = self
                .shared
                .submitter
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if self.is_closed() {
                return Err(Error::ShutDown);
            }
            let id = JobId(submitter.next_id);
            submitter.next_id += 1;
            let job = Job {
                id,
                priority,
                action,
                args,
                reply,
                submitted_at: Instant::now(),
            };
            submitter
                .sender
                .send(Message::Job(job))
                .map_err(|_| Error::ShutDown)?;
            id
        };
        debug!(job = id.0, action = action.name(), ?priority, "Submitted job");

        let handle = JobHandle { id, receiver };
        if synchronous {
            handle.wait().map(Submitted::Done)
        } else {
            Ok(Submitted::Pending(handle))
        }
    }

    /// Run a read action synchronously.
    pub fn read(&self, action: &str, priority: Priority, args: JobArgs) -> Result<JobOutput> {
        self.submit(JobKind::Read, action, priority, true, args)?.wait()
    }

    /// Run a write action synchronously.
    pub fn write(&self, action: &str, priority: Priority, args: JobArgs) -> Result<JobOutput> {
        self.submit(JobKind::Write, action, priority, true, args)?.wait()
    }

    /// Stop accepting jobs, let the worker finish everything already queued,
    /// then wait out the grace period. Idempotent.
    pub fn shutdown(&self) {
        {
            let submitter = self
                .shared
                .submitter
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !self.shared.closed.swap(true, Ordering::SeqCst) {
                // The worker may already be gone after a fatal error.
                let _ = submitter.sender.send(Message::Shutdown);
            }
        }

        let worker = self
            .shared
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                error!("Job worker panicked");
            }
            thread::sleep(self.shared.config.shutdown_grace);
            info!("Job scheduler shut down");
        }
    }
}

fn run_worker(
    mut db: Database,
    store: ContentStore,
    receiver: mpsc::Receiver<Message>,
    closed: Arc<AtomicBool>,
) {
    let mut queue: BinaryHeap<Job> = BinaryHeap::new();
    let mut stopping = false;

    loop {
        if queue.is_empty() {
            if stopping {
                break;
            }
            match receiver.recv() {
                Ok(message) => accept(message, &mut queue, &mut stopping),
                // Every handle was dropped without a shutdown.
                Err(_) => break,
            }
        }
        while let Ok(message) = receiver.try_recv() {
            accept(message, &mut queue, &mut stopping);
        }

        let Some(job) = queue.pop() else { continue };
        let fatal = run_job(&mut db, &store, job);
        if fatal {
            closed.store(true, Ordering::SeqCst);
            let abandoned = queue.len();
            // Dropping the queued reply senders resolves their waiters with ShutDown.
            queue.clear();
            while receiver.try_recv().is_ok() {}
            error!(abandoned, "Fatal error, job stream stopped");
            break;
        }
    }
    debug!("Job worker exiting");
}

fn accept(message: Message, queue: &mut BinaryHeap<Job>, stopping: &mut bool) {
    match message {
        Message::Job(job) => queue.push(job),
        Message::Shutdown => *stopping = true,
    }
}

/// Run one job and deliver its result. Returns whether the error was fatal.
fn run_job(db: &mut Database, store: &ContentStore, job: Job) -> bool {
    let span = info_span!(
        "job",
        id = job.id.0,
        kind = %job.action.kind(),
        action = job.action.name(),
        priority = ?job.priority
    );
    let _enter = span.enter();

    let queued = job.submitted_at.elapsed();
    let started = Instant::now();
    let result = execute(db, store, job.action, job.args);
    let elapsed = started.elapsed();

    let fatal = match &result {
        Ok(_) => {
            debug!(?queued, ?elapsed, "Job completed");
            false
        }
        Err(e) if e.is_fatal() => {
            error!(error = %e, ?elapsed, "Job failed fatally");
            true
        }
        Err(e) if e.is_caller_error() => {
            debug!(error = %e, "Job rejected");
            false
        }
        Err(e) => {
            warn!(error = %e, ?elapsed, "Job failed");
            false
        }
    };

    if job.reply.send(result).is_err() {
        debug!("Job result dropped by caller");
    }
    fatal
}
