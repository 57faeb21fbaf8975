mod output;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use output::{OutputMode, OutputWriter};
use shadup_core::{DedupStats, IngestStats, Options, Paranoia, Store, StoreConfig};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Directory names searched for when no store is given explicitly.
const STORE_DIR_NAMES: [&str; 2] = [".shadup", ".shadir"];

/// Shadup - deduplicate files into a content-addressed store
#[derive(Parser)]
#[command(name = "shadup")]
#[command(about = "Store files by SHA-256 and replace them with symlinks, or extract them back", long_about = None)]
#[command(version)]
struct Cli {
    /// Store directory (defaults to SHADUP_DIR, then the nearest .shadup or .shadir directory)
    #[arg(long, global = true, value_name = "DIR")]
    shadir: Option<PathBuf>,

    /// Catalog database (default: <shadir>/.shadup.db)
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Recurse into child paths for list, delete and fixlinks
    #[arg(short, long, global = true)]
    recursive: bool,

    /// Include deleted entries
    #[arg(short = 'd', long, global = true)]
    show_deleted: bool,

    /// Skip files and directories starting with '.'
    #[arg(
        long,
        global = true,
        value_name = "BOOL",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = parse_bool
    )]
    skip_dotfiles: bool,

    /// Minimum duplicate count for lspath/lshash filtering
    #[arg(long, global = true, value_name = "N")]
    mindup: Option<usize>,

    /// With fixlinks: 0=no extra checks, 1=blob exists, 2=blob exists and rehashes
    #[arg(long, global = true, value_name = "N")]
    paranoia: Option<u8>,

    /// Hashing threads (default: CPU count + 4, at most 32)
    #[arg(long, global = true, value_name = "N")]
    workers: Option<usize>,

    /// Increase verbosity (can be repeated)
    #[arg(short = 'v', global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output mode (default: pretty on a terminal, machine otherwise)
    #[arg(long, global = true, value_enum)]
    output: Option<OutputMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Move files into the store and replace them with symlinks
    Store {
        /// Directories or files to store
        #[arg(required = true)]
        roots: Vec<PathBuf>,
    },

    /// Turn stored paths back into real files
    Extract {
        /// Path prefixes, relative to the directory they were stored from
        #[arg(required = true)]
        prefixes: Vec<String>,
    },

    /// List stored paths with their digests
    #[command(alias = "ls")]
    Lspath {
        /// Paths to list (everything if omitted)
        prefixes: Vec<String>,
    },

    /// List stored paths grouped by digest
    Lshash {
        /// Digests, store links or files to look up (everything if omitted)
        digests: Vec<String>,
    },

    /// Mark stored entries as deleted by path
    Rmpath {
        /// Paths to mark deleted
        #[arg(required = true)]
        prefixes: Vec<String>,
    },

    /// Mark every entry with a matching digest as deleted
    Rmhash {
        /// Digests, store links or files
        #[arg(required = true)]
        digests: Vec<String>,
    },

    /// Replace files whose content is already stored with links, without cataloging
    Dedup {
        /// Report what would be linked without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Directories to deduplicate
        #[arg(required = true)]
        roots: Vec<PathBuf>,
    },

    /// Point symlinks back at their canonical blob
    Fixlinks {
        /// Directories or links to repair
        #[arg(required = true)]
        roots: Vec<PathBuf>,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Store { .. } => "store",
            Commands::Extract { .. } => "extract",
            Commands::Lspath { .. } => "lspath",
            Commands::Lshash { .. } => "lshash",
            Commands::Rmpath { .. } => "rmpath",
            Commands::Rmhash { .. } => "rmhash",
            Commands::Dedup { .. } => "dedup",
            Commands::Fixlinks { .. } => "fixlinks",
        }
    }
}

fn parse_bool(value: &str) -> std::result::Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "no" | "n" | "off" => Ok(false),
        _ => Err(format!("invalid boolean: {:?}", value)),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let out = OutputWriter::new(cli.output.unwrap_or_else(OutputMode::detect));
    match run(cli, &out) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            out.write_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_env("SHADUP_LOG").unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

/// Check flag combinations and build the operation options. Runs before the
/// store is opened so nothing is touched on a usage error.
fn options_for(cli: &Cli) -> Result<Options> {
    let command = &cli.command;

    let paranoia = cli.paranoia.unwrap_or(0);
    let paranoia = Paranoia::from_level(paranoia).context("--paranoia must be 0, 1, or 2")?;
    if paranoia != Paranoia::Off && !matches!(command, Commands::Fixlinks { .. }) {
        bail!("--paranoia is only valid with fixlinks");
    }

    let mindup = cli.mindup.unwrap_or(1);
    if mindup < 1 {
        bail!("--mindup must be >= 1");
    }
    if mindup != 1 && !matches!(command, Commands::Lspath { .. } | Commands::Lshash { .. }) {
        bail!("--mindup is only valid with lspath or lshash");
    }

    if cli.recursive && matches!(command, Commands::Rmhash { .. }) {
        bail!("rmhash does not accept --recursive");
    }

    let options = Options {
        skip_dotfiles: cli.skip_dotfiles,
        recursive: cli.recursive,
        include_deleted: cli.show_deleted,
        min_duplicates: mindup,
        paranoia,
        workers: cli.workers,
    };
    options.validate()?;
    Ok(options)
}

/// Pick the store directory: an explicit flag, then the environment, then
/// the nearest marker directory above `cwd`.
fn locate_store(
    explicit: Option<&Path>,
    env: Option<OsString>,
    cwd: &Path,
    home: Option<&Path>,
) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    if let Some(dir) = env.filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    match find_store(cwd, home) {
        Some(dir) => Ok(dir),
        None => bail!("--shadir is required when no .shadup or .shadir directory is found"),
    }
}

/// Search `start` and its ancestors for a store directory. The search stops
/// at the home directory when `start` is inside it, otherwise at `/`.
fn find_store(start: &Path, home: Option<&Path>) -> Option<PathBuf> {
    let stop_at = home.filter(|h| start.starts_with(h));
    let mut current = start;
    loop {
        for name in STORE_DIR_NAMES {
            let candidate = current.join(name);
            if candidate.is_dir() {
                return Some(candidate);
            }
        }
        if Some(current) == stop_at {
            return None;
        }
        current = current.parent()?;
    }
}

fn run(cli: Cli, out: &OutputWriter) -> Result<()> {
    let options = options_for(&cli)?;
    let cwd = std::env::current_dir().context("Failed to read the working directory")?;
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let shadir = locate_store(
        cli.shadir.as_deref(),
        std::env::var_os("SHADUP_DIR"),
        &cwd,
        home.as_deref(),
    )?;

    let mut config = StoreConfig::new(&shadir, &cwd);
    if let Some(db) = &cli.db {
        config = config.with_catalog(db);
    }
    let store = Store::open(&config)
        .with_context(|| format!("Failed to open store at {}", shadir.display()))?;
    info!(command = cli.command.name(), store = %store.root().display(), "starting");

    match cli.command {
        Commands::Store { roots } => cmd_store(&store, &roots, &options, out),
        Commands::Extract { prefixes } => cmd_extract(&store, &prefixes, &options, out),
        Commands::Lspath { prefixes } => cmd_lspath(&store, &prefixes, &options, out),
        Commands::Lshash { digests } => cmd_lshash(&store, &digests, &options, out),
        Commands::Rmpath { prefixes } => cmd_rmpath(&store, &prefixes, &options, out),
        Commands::Rmhash { digests } => cmd_rmhash(&store, &digests, out),
        Commands::Dedup { dry_run, roots } => cmd_dedup(&store, &roots, &options, dry_run, out),
        Commands::Fixlinks { roots } => cmd_fixlinks(&store, &roots, &options, out),
    }
}

fn cmd_store(store: &Store, roots: &[PathBuf], options: &Options, out: &OutputWriter) -> Result<()> {
    let mut total = IngestStats::default();
    for root in roots {
        info!(root = %root.display(), "store");
        let stats = store
            .ingest(root, options)
            .with_context(|| format!("Failed to store {}", root.display()))?;
        total.files += stats.files;
        total.stored_bytes += stats.stored_bytes;
        total.skipped_bytes += stats.skipped_bytes;
        total.skipped += stats.skipped;
    }

    out.summary("store", &total, || {
        let mut text = format!(
            "stored files: {}\nstored bytes: {}\nduplicate bytes: {}\n",
            total.files, total.stored_bytes, total.skipped_bytes
        );
        if total.skipped > 0 {
            text.push_str(&format!("skipped files: {}\n", total.skipped));
        }
        text
    })
}

fn cmd_extract(store: &Store, prefixes: &[String], options: &Options, out: &OutputWriter) -> Result<()> {
    let stats = store
        .extract(prefixes, options)
        .with_context(|| format!("Failed to extract {}", prefixes.join(", ")))?;

    out.summary("extract", &stats, || {
        let mut text = format!("extracted bytes: {}\n", stats.bytes);
        if stats.skipped > 0 {
            text.push_str(&format!("missing blobs: {}\n", stats.skipped));
        }
        text
    })
}

fn cmd_lspath(store: &Store, prefixes: &[String], options: &Options, out: &OutputWriter) -> Result<()> {
    let entries = store
        .list_paths(prefixes, options)
        .context("Failed to list paths")?;
    out.paths(&entries, options.include_deleted)
}

fn cmd_lshash(store: &Store, digests: &[String], options: &Options, out: &OutputWriter) -> Result<()> {
    let groups = store
        .list_digests(digests, options)
        .context("Failed to list digests")?;
    out.groups(&groups, options.include_deleted)
}

fn cmd_rmpath(store: &Store, prefixes: &[String], options: &Options, out: &OutputWriter) -> Result<()> {
    let stats = store
        .delete_paths(prefixes, options)
        .context("Failed to delete paths")?;

    out.summary("rmpath", &stats, || {
        let mut text = format!("deleted entries: {}\n", stats.deleted);
        for prefix in &stats.skipped_prefixes {
            text.push_str(&format!("skipped directory (use -r): {}\n", output::pretty_path(prefix)));
        }
        text
    })
}

fn cmd_rmhash(store: &Store, digests: &[String], out: &OutputWriter) -> Result<()> {
    let deleted = store
        .delete_digests(digests)
        .context("Failed to delete digests")?;

    #[derive(serde::Serialize)]
    struct RmhashStats {
        deleted: usize,
    }
    out.summary("rmhash", &RmhashStats { deleted }, || {
        format!("deleted entries: {}\n", deleted)
    })
}

fn cmd_dedup(
    store: &Store,
    roots: &[PathBuf],
    options: &Options,
    dry_run: bool,
    out: &OutputWriter,
) -> Result<()> {
    let mut total = DedupStats::default();
    for root in roots {
        info!(root = %root.display(), dry_run, "dedup");
        let stats = store
            .dedup(root, options, dry_run)
            .with_context(|| format!("Failed to dedup {}", root.display()))?;
        total.linked += stats.linked;
        total.bytes += stats.bytes;
        total.skipped += stats.skipped;
    }

    out.summary("dedup", &total, || {
        let verb = if dry_run { "would link" } else { "linked" };
        format!("{} files: {}\n{} bytes: {}\n", verb, total.linked, verb, total.bytes)
    })
}

fn cmd_fixlinks(store: &Store, roots: &[PathBuf], options: &Options, out: &OutputWriter) -> Result<()> {
    let stats = store
        .fixlinks(roots, options)
        .context("Failed to fix links")?;

    out.summary("fixlinks", &stats, || {
        let mut text = format!("checked links: {}\nfixed links: {}\n", stats.checked, stats.fixed);
        if stats.skipped > 0 {
            text.push_str(&format!("skipped links: {}\n", stats.skipped));
        }
        text
    })
}
