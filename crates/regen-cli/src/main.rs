//! Command-line front end for the regen pipeline engine.
//!
//! Provides the `regen` binary. Every subcommand opens the pipeline state
//! (an SQLite database by default), runs one operation and prints its
//! outcome as JSON on stdout.
//!
//! Reads configuration from flags or environment variables:
//! - `REGEN_DB_PATH`: SQLite database file path (default: "regen.db")
//! - `REGEN_STRICT_KINDS`: disable the step-key substring fallback of
//!   kind invalidation
//! - `RUST_LOG`: log filter for stderr output (default: "warn")
//!
//! Exit codes: 0 = success, 1 = negative outcome (not found, invalid,
//! unreachable), 3 = storage or I/O failure.

mod commands;

use std::path::PathBuf;
use std::process;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Incremental generation-pipeline state tool.
#[derive(Parser)]
#[command(name = "regen", about = "Track resources, kinds and build-cache state")]
struct Cli {
    /// Path to the state database file.
    #[arg(long, global = true, env = "REGEN_DB_PATH", default_value = "regen.db")]
    db: PathBuf,

    /// Use an ephemeral in-memory store instead of the database.
    #[arg(long, global = true)]
    memory: bool,

    /// Match kind invalidations on recorded kinds only.
    #[arg(long, global = true, env = "REGEN_STRICT_KINDS")]
    strict_kinds: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Tracked input resources.
    #[command(subcommand)]
    Resource(ResourceCommand),

    /// Artifact kinds and transform edges.
    #[command(subcommand)]
    Kind(KindCommand),

    /// Build-cache entries.
    #[command(subcommand)]
    Cache(CacheCommand),

    /// Record a resource observation and invalidate everything built from it
    /// if its digest changed.
    Observe {
        locator: String,

        #[command(flatten)]
        attrs: ResourceAttrs,
    },

    /// Stop tracking a resource and invalidate entries recorded against it.
    Forget { locator: String },
}

/// Attributes of one resource observation.
#[derive(Args)]
struct ResourceAttrs {
    /// Kind of the resource.
    #[arg(short, long)]
    kind: String,

    /// Content digest, opaque to regen.
    #[arg(short, long)]
    digest: String,

    /// Size in bytes.
    #[arg(long)]
    size: Option<u64>,

    /// Last modification time (RFC 3339).
    #[arg(long)]
    last_modified: Option<DateTime<Utc>>,
}

#[derive(Subcommand)]
enum ResourceCommand {
    /// Record the current digest of a resource.
    Upsert {
        locator: String,

        #[command(flatten)]
        attrs: ResourceAttrs,
    },

    /// Hash a file with blake3 and record it.
    Track {
        path: PathBuf,

        /// Kind of the file.
        #[arg(short, long)]
        kind: String,

        /// Locator to record under (default: the path as given).
        #[arg(long)]
        locator: Option<String>,
    },

    /// Show the stored digest of a resource.
    Get { locator: String },

    /// List tracked resources.
    List {
        /// Only resources of this kind.
        #[arg(short, long)]
        kind: Option<String>,
    },

    /// Stop tracking a resource.
    Remove { locator: String },

    /// Content-level diff between two digests.
    Diff {
        locator: String,
        old_digest: String,
        new_digest: String,
    },
}

#[derive(Subcommand)]
enum KindCommand {
    /// Define a kind (idempotent).
    Define {
        name: String,

        #[arg(short, long, default_value = "artifact")]
        category: String,
    },

    /// Declare a transform edge between two kinds.
    Connect {
        from: String,
        to: String,

        /// Relation label of the edge.
        #[arg(short, long)]
        relation: String,

        /// Name of the transform implementing the edge.
        #[arg(short, long)]
        transform: Option<String>,
    },

    /// Shortest transform route between two kinds.
    Route { from: String, to: String },

    /// Check that a direct transform exists.
    Validate { from: String, to: String },

    /// Kinds transitively downstream of a kind.
    Dependents { kind: String },

    /// Direct incoming transforms of a kind.
    Producers { kind: String },

    /// Direct outgoing transforms of a kind.
    Consumers { kind: String },

    /// Every kind and edge.
    Graph,

    /// Kinds in dependency order, sources first.
    Order,
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Decide whether a step must re-run.
    Check {
        step: String,

        #[arg(long)]
        input_hash: String,

        /// The step's output varies between runs on the same input.
        #[arg(long)]
        non_deterministic: bool,
    },

    /// Store the result of a step run.
    Record {
        step: String,

        #[arg(long)]
        input_hash: String,

        #[arg(long)]
        output_hash: String,

        #[arg(long)]
        output_ref: Option<String>,

        /// Locator of the resource the step read.
        #[arg(long)]
        source: Option<String>,

        /// Kind the step produces.
        #[arg(long)]
        kind: Option<String>,

        #[arg(long)]
        non_deterministic: bool,
    },

    /// Mark one step stale.
    Invalidate { step: String },

    /// Mark every step recorded against a resource stale.
    InvalidateSource { locator: String },

    /// Mark every step of a kind stale.
    InvalidateKind { kind: String },

    /// Mark every step stale.
    InvalidateAll,

    /// Every entry with its hash and staleness.
    Status,

    /// Step keys currently stale.
    Stale,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = match commands::run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            3
        }
    };
    process::exit(code);
}
