//! Subcommand execution.
//!
//! Each handler runs one pipeline operation, prints its outcome as JSON and
//! returns the process exit code. Only infrastructure failures come back as
//! errors.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use regen_core::{
    CacheConfig, ConnectOutcome, CoreError, GetOutcome, InvalidateOutcome, Pipeline,
    RemoveOutcome, ResourceUpdate, RouteOutcome, SharedStore, StepRecord, ValidateOutcome,
};
use regen_storage::{InMemoryStore, SqliteStore, StorageError};

use crate::{CacheCommand, Cli, Commands, KindCommand, ResourceAttrs, ResourceCommand};

const OK: i32 = 0;
const NEGATIVE: i32 = 1;

#[derive(Debug, Error)]
pub(crate) enum CliError {
    #[error("failed to open database '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: StorageError,
    },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn run(cli: Cli) -> Result<i32, CliError> {
    let store = open_store(&cli)?;
    let config = CacheConfig {
        strict_kind_matching: cli.strict_kinds,
    };
    let pipeline = Pipeline::with_config(store, config);

    match cli.command {
        Commands::Resource(cmd) => resource(&pipeline, cmd),
        Commands::Kind(cmd) => kind(&pipeline, cmd),
        Commands::Cache(cmd) => cache(&pipeline, cmd),
        Commands::Observe { locator, attrs } => {
            let report = pipeline.observe(update(locator, attrs))?;
            Ok(emit(&report, false))
        }
        Commands::Forget { locator } => {
            let report = pipeline.forget(&locator)?;
            let missing = matches!(report.outcome, RemoveOutcome::NotFound { .. });
            Ok(emit(&report, missing))
        }
    }
}

fn open_store(cli: &Cli) -> Result<SharedStore, CliError> {
    if cli.memory {
        return Ok(Arc::new(InMemoryStore::new()));
    }
    tracing::debug!(db = %cli.db.display(), "opening state database");
    let store = SqliteStore::new(&cli.db).map_err(|source| CliError::Open {
        path: cli.db.clone(),
        source,
    })?;
    Ok(Arc::new(store))
}

fn update(locator: String, attrs: ResourceAttrs) -> ResourceUpdate {
    let mut update = ResourceUpdate::new(locator, attrs.kind, attrs.digest);
    update.size = attrs.size;
    update.last_modified = attrs.last_modified;
    update
}

fn resource(pipeline: &Pipeline, cmd: ResourceCommand) -> Result<i32, CliError> {
    let tracker = pipeline.resources();
    match cmd {
        ResourceCommand::Upsert { locator, attrs } => {
            Ok(emit(&tracker.upsert(update(locator, attrs))?, false))
        }
        ResourceCommand::Track {
            path,
            kind,
            locator,
        } => {
            let update = track(&path, kind, locator)?;
            Ok(emit(&tracker.upsert(update)?, false))
        }
        ResourceCommand::Get { locator } => {
            let out = tracker.get(&locator)?;
            let missing = matches!(out, GetOutcome::NotFound { .. });
            Ok(emit(&out, missing))
        }
        ResourceCommand::List { kind } => {
            let resources = tracker.list(kind.as_deref())?;
            Ok(emit(&json!({ "resources": resources }), false))
        }
        ResourceCommand::Remove { locator } => {
            let out = tracker.remove(&locator)?;
            let missing = matches!(out, RemoveOutcome::NotFound { .. });
            Ok(emit(&out, missing))
        }
        ResourceCommand::Diff {
            locator,
            old_digest,
            new_digest,
        } => Ok(emit(
            &tracker.diff(&locator, &old_digest, &new_digest),
            false,
        )),
    }
}

/// Hashes a file and describes it as a resource update.
fn track(path: &Path, kind: String, locator: Option<String>) -> Result<ResourceUpdate, CliError> {
    let read_err = |source| CliError::Read {
        path: path.to_path_buf(),
        source,
    };
    let bytes = fs::read(path).map_err(read_err)?;
    let meta = fs::metadata(path).map_err(read_err)?;

    let digest = blake3::hash(&bytes).to_hex().to_string();
    let locator = locator.unwrap_or_else(|| path.display().to_string());
    let mut update = ResourceUpdate::new(locator, kind, digest).size(meta.len());
    if let Ok(modified) = meta.modified() {
        update = update.last_modified(DateTime::<Utc>::from(modified));
    }
    Ok(update)
}

fn kind(pipeline: &Pipeline, cmd: KindCommand) -> Result<i32, CliError> {
    let graph = pipeline.kinds();
    match cmd {
        KindCommand::Define { name, category } => Ok(emit(&graph.define(&name, &category)?, false)),
        KindCommand::Connect {
            from,
            to,
            relation,
            transform,
        } => {
            let out = graph.connect(&from, &to, &relation, transform.as_deref())?;
            let invalid = matches!(out, ConnectOutcome::Invalid { .. });
            Ok(emit(&out, invalid))
        }
        KindCommand::Route { from, to } => {
            let out = graph.route(&from, &to)?;
            let unreachable = matches!(out, RouteOutcome::Unreachable { .. });
            Ok(emit(&out, unreachable))
        }
        KindCommand::Validate { from, to } => {
            let out = graph.validate(&from, &to)?;
            let invalid = matches!(out, ValidateOutcome::Invalid { .. });
            Ok(emit(&out, invalid))
        }
        KindCommand::Dependents { kind } => {
            let downstream = graph.dependents(&kind)?;
            Ok(emit(&json!({ "downstream": downstream }), false))
        }
        KindCommand::Producers { kind } => {
            let transforms = graph.producers(&kind)?;
            Ok(emit(&json!({ "transforms": transforms }), false))
        }
        KindCommand::Consumers { kind } => {
            let transforms = graph.consumers(&kind)?;
            Ok(emit(&json!({ "transforms": transforms }), false))
        }
        KindCommand::Graph => Ok(emit(&graph.graph()?, false)),
        KindCommand::Order => {
            let kinds = graph.build_order()?;
            Ok(emit(&json!({ "kinds": kinds }), false))
        }
    }
}

fn cache(pipeline: &Pipeline, cmd: CacheCommand) -> Result<i32, CliError> {
    let cache = pipeline.cache();
    match cmd {
        CacheCommand::Check {
            step,
            input_hash,
            non_deterministic,
        } => Ok(emit(
            &cache.check(&step, &input_hash, !non_deterministic)?,
            false,
        )),
        CacheCommand::Record {
            step,
            input_hash,
            output_hash,
            output_ref,
            source,
            kind,
            non_deterministic,
        } => {
            let record = StepRecord {
                output_ref,
                source_locator: source,
                kind,
                ..StepRecord::new(step, input_hash, output_hash).deterministic(!non_deterministic)
            };
            let id = cache.record(record)?;
            Ok(emit(&json!({ "entry": id }), false))
        }
        CacheCommand::Invalidate { step } => {
            let out = cache.invalidate(&step)?;
            let missing = matches!(out, InvalidateOutcome::NotFound { .. });
            Ok(emit(&out, missing))
        }
        CacheCommand::InvalidateSource { locator } => {
            let invalidated = cache.invalidate_by_source(&locator)?;
            Ok(emit(&json!({ "invalidated": invalidated }), false))
        }
        CacheCommand::InvalidateKind { kind } => {
            let invalidated = cache.invalidate_by_kind(&kind)?;
            Ok(emit(&json!({ "invalidated": invalidated }), false))
        }
        CacheCommand::InvalidateAll => {
            let cleared = cache.invalidate_all()?;
            Ok(emit(&json!({ "cleared": cleared }), false))
        }
        CacheCommand::Status => {
            let entries = cache.status()?;
            Ok(emit(&json!({ "entries": entries }), false))
        }
        CacheCommand::Stale => {
            let steps = cache.stale_steps()?;
            Ok(emit(&json!({ "steps": steps }), false))
        }
    }
}

/// Prints `value` as pretty JSON and picks the exit code.
fn emit<T: Serialize>(value: &T, negative: bool) -> i32 {
    let json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize result: {}\"}}", e));
    println!("{}", json);
    if negative {
        NEGATIVE
    } else {
        OK
    }
}
