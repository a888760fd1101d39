use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tagvault::config::Config;
use tagvault::content::ContentUpdate;
use tagvault::db::Database;
use tagvault::import::{discover_files, ContentStore, ImageExtractor, ImportOptions, ImportStatus};
use tagvault::jobs::{JobArgs, JobHandle, JobKind, JobScheduler, Priority, Submitted};
use tagvault::logging;
use tagvault::media::{FileId, Hash};
use tagvault::predicates::{Predicate, SearchContext};
use tagvault::services::{ServiceKey, ServiceType};

enum Command {
    Import(Vec<PathBuf>),
    Query { all_files: bool, local_tags: bool, predicates: Vec<String> },
    Tag { hash: String, tags: Vec<String> },
    Archive(Vec<String>),
    Services,
}

struct Args {
    config_path: Option<PathBuf>,
    root: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut root = None;
    let mut all_files = false;
    let mut local_tags = false;
    let mut positional = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("tagvault {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" | "--root" | "-r" => {
                if i + 1 < args.len() {
                    let value = Some(PathBuf::from(&args[i + 1]));
                    if args[i].starts_with("--c") || args[i] == "-c" {
                        config_path = value;
                    } else {
                        root = value;
                    }
                    i += 1;
                } else {
                    eprintln!("Error: {} requires a path argument", args[i]);
                    std::process::exit(1);
                }
            }
            "--all" => all_files = true,
            "--local-tags" => local_tags = true,
            _ => positional.push(args[i].clone()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("import") => Command::Import(positional.map(PathBuf::from).collect()),
        Some("query") => Command::Query {
            all_files,
            local_tags,
            predicates: positional.collect(),
        },
        Some("tag") => match positional.next() {
            Some(hash) => Command::Tag { hash, tags: positional.collect() },
            None => usage_error("tag requires a hash"),
        },
        Some("archive") => Command::Archive(positional.collect()),
        Some("services") => Command::Services,
        Some(other) => usage_error(&format!("Unknown command: {}", other)),
        None => usage_error("No command given"),
    };

    Args { config_path, root, command }
}

fn usage_error(message: &str) -> ! {
    eprintln!("Error: {}", message);
    print_help();
    std::process::exit(1);
}

fn print_help() {
    println!(
        r#"tagvault - content-addressed media catalogue

USAGE:
    tagvault [OPTIONS] <COMMAND>

COMMANDS:
    import PATH...          Import files; directories are searched recursively
    query [--all] [--local-tags] PRED...
                            List files matching every predicate
                            (e.g. inbox, size>10kb, width~200, ratio=16:9,
                             mime=images, age<7d, tag=car, -tag=car, limit=50)
    tag HASH TAG...         Add local tags to a file
    archive HASH...         Move files out of the inbox
    services                List services

OPTIONS:
    --config, -c PATH   Path to config file
    --root, -r PATH     Storage root (overrides config)
    --all               Query every file service, not only local files
    --local-tags        Match tag predicates against local tags only
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    TAGVAULT_CONFIG     Path to config file (overrides default location)
    TAGVAULT_LOG        Log filter (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/tagvault/config.toml"#
    );
}

fn parse_hashes(hexes: &[String]) -> Result<Vec<Hash>> {
    hexes
        .iter()
        .map(|hex| Hash::from_hex(hex).with_context(|| format!("invalid hash: {}", hex)))
        .collect()
}

fn import(scheduler: &JobScheduler, config: &Config, paths: &[PathBuf]) -> Result<()> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(discover_files(path, &config.import.extensions));
        } else {
            files.push(path.clone());
        }
    }

    let mut pending: Vec<(PathBuf, JobHandle)> = Vec::with_capacity(files.len());
    for path in files {
        let args = JobArgs::ImportFile {
            path: path.clone(),
            options: ImportOptions::default(),
        };
        if let Submitted::Pending(handle) =
            scheduler.submit(JobKind::Write, "import_file", Priority::Normal, false, args)?
        {
            pending.push((path, handle));
        }
    }

    let (mut imported, mut redundant, mut failed) = (0, 0, 0);
    for (path, handle) in pending {
        let Some(outcome) = handle.wait()?.into_import() else {
            continue;
        };
        match outcome.status {
            ImportStatus::Successful if outcome.redundant => redundant += 1,
            ImportStatus::Successful => {
                imported += 1;
                if let Some(hash) = outcome.hash {
                    println!("{}  {}", hash, path.display());
                }
            }
            ImportStatus::Failed => {
                failed += 1;
                eprintln!(
                    "failed: {}: {}",
                    path.display(),
                    outcome.diagnostic.unwrap_or_default()
                );
            }
        }
    }
    println!("{} imported, {} already present, {} failed", imported, redundant, failed);
    Ok(())
}

fn query(scheduler: &JobScheduler, all_files: bool, local_tags: bool, texts: &[String]) -> Result<()> {
    let predicates = texts
        .iter()
        .map(|text| text.parse::<Predicate>())
        .collect::<tagvault::Result<Vec<_>>>()?;
    let file_service = if all_files {
        ServiceKey::combined_file()
    } else {
        ServiceKey::local_file()
    };
    let mut context = SearchContext::new(file_service, predicates)?;
    if local_tags {
        context = context.with_tag_service(ServiceKey::local_tag());
    }

    let ids = scheduler
        .read("file_query_ids", Priority::High, JobArgs::Search(context.clone()))?
        .into_file_ids()
        .unwrap_or_default();
    let ids: Vec<FileId> = context.apply_limit(&ids);

    let results = scheduler
        .read("media_results", Priority::High, JobArgs::FileIds(ids))?
        .into_media_results()
        .unwrap_or_default();
    for result in &results {
        let dimensions = match (result.width(), result.height()) {
            (Some(w), Some(h)) => format!("{}x{}", w, h),
            _ => "-".to_string(),
        };
        let tags: Vec<&str> = result.all_tags().into_iter().collect();
        println!(
            "{}  {:<12} {:>10}  {:<9}  {}",
            result.hash(),
            result.mime(),
            result.size(),
            dimensions,
            tags.join(", ")
        );
    }
    println!("{} files", results.len());
    Ok(())
}

fn update(scheduler: &JobScheduler, key: ServiceKey, updates: Vec<ContentUpdate>) -> Result<()> {
    let updates = BTreeMap::from([(key, updates)]);
    scheduler.write("content_updates", Priority::Normal, JobArgs::ContentUpdates(updates))?;
    Ok(())
}

fn list_services(scheduler: &JobScheduler) -> Result<()> {
    let types: BTreeSet<ServiceType> = ServiceType::ALL.into_iter().collect();
    let services = scheduler
        .read("services", Priority::Normal, JobArgs::ServiceTypes(types))?
        .into_services()
        .unwrap_or_default();
    for service in services {
        println!(
            "{:<24} {:<24} {}",
            service.service_type(),
            service.identifier.name,
            service.key()
        );
    }
    Ok(())
}

fn run(scheduler: &JobScheduler, config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Import(paths) => {
            if paths.is_empty() {
                bail!("import requires at least one path");
            }
            import(scheduler, config, &paths)
        }
        Command::Query { all_files, local_tags, predicates } => query(scheduler, all_files, local_tags, &predicates),
        Command::Tag { hash, tags } => {
            let hashes = parse_hashes(&[hash])?;
            let updates = tags
                .iter()
                .map(|tag| ContentUpdate::add_mapping(tag, hashes.clone()))
                .collect::<tagvault::Result<Vec<_>>>()?;
            update(scheduler, ServiceKey::local_tag(), updates)
        }
        Command::Archive(hexes) => {
            let hashes = parse_hashes(&hexes)?;
            update(scheduler, ServiceKey::local_file(), vec![ContentUpdate::archive(hashes)])
        }
        Command::Services => list_services(scheduler),
    }
}

fn main() -> Result<()> {
    let args = parse_args();

    let mut config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(root) = args.root {
        config.storage.root = root;
    }

    if let Err(e) = logging::init(&config.logging, &config.storage.root) {
        eprintln!("Warning: logging disabled: {:#}", e);
    }

    let db = Database::open(config.layout())
        .with_context(|| format!("cannot open storage at {}", config.storage.root.display()))?;
    let store = ContentStore::new(Box::new(ImageExtractor), config.import.thumbnail_size);
    let scheduler = JobScheduler::start(db, store, config.scheduler_config())?;

    let result = run(&scheduler, &config, args.command);
    scheduler.shutdown();
    result
}
