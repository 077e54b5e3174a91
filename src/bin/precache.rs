//! precache CLI - one-shot precache synchronization against a base URL.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use precache::{
    DiskStore, GenerationRecord, HttpFetcher, Manifest, PathConfig, SyncConfig, SyncProgress,
    Synchronizer,
};

const DEFAULT_CONCURRENT_FETCHES: usize = 4;
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30_000;

// ============================================================================
// CLI Configuration
// ============================================================================

struct CliConfig {
    manifest_path: Option<String>,
    base_url: Option<String>,
    cache_dir: Option<PathBuf>,
    sync_config: SyncConfig,
}

// ============================================================================
// Progress Reporting
// ============================================================================

/// Prints one line per fetched resource and tracks the byte total.
struct PrintProgress {
    total_bytes: AtomicU64,
}

impl PrintProgress {
    const fn new() -> Self {
        Self {
            total_bytes: AtomicU64::new(0),
        }
    }

    fn total(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }
}

impl SyncProgress for PrintProgress {
    fn on_sync_start(&self, to_fetch: usize, unchanged: usize) {
        println!("Fetching {to_fetch} resource(s) ({unchanged} unchanged)...");
    }

    fn on_entry_fetched(&self, name: &str, bytes: u64) {
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
        println!("  {name} ({bytes} B)");
    }

    fn on_entry_failed(&self, name: &str, error: &str) {
        eprintln!("  {name} FAILED: {error}");
    }
}

// ============================================================================
// CLI Parsing
// ============================================================================

fn parse_args(args: &[String]) -> CliConfig {
    let mut manifest_path = None;
    let mut base_url = None;
    let mut cache_dir = None;
    let mut concurrent_fetches = DEFAULT_CONCURRENT_FETCHES;
    let mut fetch_timeout_ms = DEFAULT_FETCH_TIMEOUT_MS;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-b" | "--base-url" => {
                i += 1;
                if i < args.len() {
                    base_url = Some(args[i].clone());
                }
            }
            "-c" | "--cache-dir" => {
                i += 1;
                if i < args.len() {
                    cache_dir = Some(PathBuf::from(&args[i]));
                }
            }
            "-p" | "--parallel" => {
                i += 1;
                if i < args.len() {
                    concurrent_fetches = args[i].parse().unwrap_or(DEFAULT_CONCURRENT_FETCHES);
                }
            }
            "-t" | "--timeout-ms" => {
                i += 1;
                if i < args.len() {
                    fetch_timeout_ms = args[i].parse().unwrap_or(DEFAULT_FETCH_TIMEOUT_MS);
                }
            }
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            arg if !arg.starts_with('-') => {
                manifest_path = Some(arg.to_string());
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                std::process::exit(1);
            }
        }
        i += 1;
    }

    CliConfig {
        manifest_path,
        base_url,
        cache_dir,
        sync_config: SyncConfig::new()
            .with_concurrent_fetches(concurrent_fetches)
            .with_fetch_timeout_ms(fetch_timeout_ms),
    }
}

fn print_usage() {
    eprintln!("Usage: precache [OPTIONS] -b <BASE_URL> <manifest.json>");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <manifest.json>       Manifest file: JSON array of {{url, revision}} pairs");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -b, --base-url <URL>  Base URL logical names are resolved against");
    eprintln!("  -c, --cache-dir <DIR> Blob cache directory (default: platform cache dir)");
    eprintln!(
        "  -p, --parallel <N>    Concurrent fetches (default: {DEFAULT_CONCURRENT_FETCHES})"
    );
    eprintln!("  -t, --timeout-ms <N>  Per-fetch timeout (default: {DEFAULT_FETCH_TIMEOUT_MS})");
    eprintln!("  -h, --help            Show this help");
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> precache::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let config = parse_args(&args);

    let (Some(manifest_path), Some(base_url)) = (&config.manifest_path, &config.base_url) else {
        print_usage();
        std::process::exit(1);
    };

    let paths = config
        .cache_dir
        .as_ref()
        .map_or_else(PathConfig::default, PathConfig::rooted_at);

    let json = std::fs::read_to_string(manifest_path)?;
    let manifest = Manifest::from_json(&json)?;
    println!(
        "Manifest {} declares {} resource(s).",
        manifest_path,
        manifest.len()
    );

    let fetcher = HttpFetcher::new(base_url.as_str())?;
    let store = DiskStore::new(&paths.cache_dir);

    // Resume from the persisted generation so unchanged blobs are kept.
    let previous = match GenerationRecord::load(&paths.record_path)? {
        Some(record) => {
            let generation = record.into_generation()?;
            println!(
                "Resuming from generation {} ({} resource(s)).",
                generation.id(),
                generation.len()
            );
            generation
        }
        None => precache::CacheGeneration::empty(),
    };

    let sync = Synchronizer::with_active(fetcher, store, config.sync_config, previous)
        .with_record_path(&paths.record_path);

    let progress = Arc::new(PrintProgress::new());
    let dyn_progress: Arc<dyn SyncProgress> = progress.clone() as Arc<dyn SyncProgress>;

    let diff = sync.install(manifest, &dyn_progress).await?;
    let report = sync.activate().await?;

    println!();
    println!("{}", "─".repeat(60));
    println!("Synchronization Summary");
    println!("{}", "─".repeat(60));
    println!("  Generation:        {}", report.generation);
    println!("  Added:             {}", diff.added.len());
    println!("  Changed:           {}", diff.changed.len());
    println!("  Removed:           {}", diff.removed.len());
    println!("  Unchanged:         {}", diff.unchanged.len());
    println!("  Bytes fetched:     {}", progress.total());
    println!("  Blobs evicted:     {}", report.evicted);
    println!("  Cache dir:         {}", paths.cache_dir.display());
    println!("{}", "─".repeat(60));

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
