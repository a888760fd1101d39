//! Logging setup for the catalogue.
//!
//! The `[logging]` config section picks a backend and a level for the
//! `tagvault` target; dependencies stay at `warn` so decoder and database
//! crates do not flood a long import. `TAGVAULT_LOG` overrides the filter
//! with full `EnvFilter` directives.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "tagvault";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogBackend {
    /// journald when reachable, else rolling files.
    #[default]
    Auto,
    Journald,
    File,
    Stderr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub backend: LogBackend,

    /// Level for the catalogue's own events.
    #[serde(default = "default_level")]
    pub level: String,

    /// Where rolling log files go. Defaults to `logs/` under the storage root.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Daily files kept before the oldest is removed.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_max_files() -> usize {
    14
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            backend: LogBackend::default(),
            level: default_level(),
            directory: None,
            max_files: default_max_files(),
        }
    }
}

impl LoggingConfig {
    /// Filter directives used when `TAGVAULT_LOG` is unset.
    pub fn directives(&self) -> String {
        format!("warn,tagvault={}", self.level.trim())
    }

    pub fn log_dir(&self, storage_root: &Path) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| storage_root.join("logs"))
    }
}

/// The backend actually used once journald availability is known.
fn resolve(backend: LogBackend, journald_reachable: bool) -> LogBackend {
    match backend {
        LogBackend::Auto if journald_reachable => LogBackend::Journald,
        LogBackend::Auto => LogBackend::File,
        LogBackend::Journald if !journald_reachable => LogBackend::File,
        other => other,
    }
}

fn filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_env("TAGVAULT_LOG")
        .or_else(|_| EnvFilter::try_new(config.directives()))
        .unwrap_or_else(|_| EnvFilter::new("warn,tagvault=info"))
}

/// Install the global subscriber. Call once, before the scheduler starts.
pub fn init(config: &LoggingConfig, storage_root: &Path) -> Result<()> {
    let env_filter = filter(config);

    #[cfg(target_os = "linux")]
    let journald = match config.backend {
        LogBackend::Auto | LogBackend::Journald => tracing_journald::layer().ok(),
        _ => None,
    };
    #[cfg(not(target_os = "linux"))]
    let journald: Option<tracing_subscriber::layer::Identity> = None;

    match resolve(config.backend, journald.is_some()) {
        LogBackend::Journald => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(journald)
                .init();
            tracing::info!("Logging to journald");
        }
        LogBackend::Stderr => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            let log_dir = config.log_dir(storage_root);
            std::fs::create_dir_all(&log_dir)?;

            let appender = Builder::new()
                .rotation(Rotation::DAILY)
                .filename_prefix(LOG_FILE_PREFIX)
                .filename_suffix("log")
                .max_log_files(config.max_files.max(1))
                .build(&log_dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            // Flushes on drop, so it lives as long as the process.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();
            tracing::info!(dir = %log_dir.display(), "Logging to rolling files");
        }
    }
    Ok(())
}
