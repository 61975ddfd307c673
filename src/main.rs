use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use library_enrich::batch::{BatchOptions, BatchStatus};
use library_enrich::catalog::CatalogSearch;
use library_enrich::config::{AppConfig, CliConfig, FileConfig};
use library_enrich::enrich::Enricher;
use library_enrich::error::PersistenceError;
use library_enrich::job::{ImportJob, ImportRequest};
use library_enrich::models::{BatchStats, TrackRecord};
use library_enrich::plist::{parse_library_file, ParseOptions};
use library_enrich::progress::{create_spinner, format_duration, BarProgress, ProgressEvent, ProgressSink};
use library_enrich::safety::validate_output_path;
use library_enrich::scoring::SimilarityMetric;
use library_enrich::spotify::SpotifyClient;
use library_enrich::store::{SqliteTrackStore, TrackStore};

#[derive(Parser)]
#[command(name = "library-enrich")]
#[command(about = "Import a music-library export, fill in missing release years, and store the tracks")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Args)]
struct GlobalArgs {
    /// TOML config file; fills in settings not given on the command line
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database holding the imported tracks [default: tracks.sqlite3]
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[arg(long, global = true, env = "SPOTIFY_CLIENT_ID", hide_env_values = true)]
    spotify_client_id: Option<String>,

    #[arg(long, global = true, env = "SPOTIFY_CLIENT_SECRET", hide_env_values = true)]
    spotify_client_secret: Option<String>,

    /// Similarity metric for title/artist comparison
    #[arg(long, global = true, value_enum)]
    metric: Option<SimilarityMetric>,

    /// Strip version suffixes and fold to ASCII before comparing
    #[arg(long, global = true)]
    lenient: bool,

    /// Timeout for each catalog request, in seconds [default: 10]
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Log-only mode: hide progress bars, log periodic progress lines instead
    #[arg(long, global = true)]
    log_only: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Parse, enrich and store a library export
    Import(ImportArgs),
    /// Re-run enrichment for one stored track
    Enrich(EnrichArgs),
    /// List stored tracks
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Delete all stored tracks
    Clear,
    /// Show the first tracks of a library export
    Preview {
        library: PathBuf,

        #[arg(long, default_value = "5")]
        rows: usize,
    },
}

#[derive(Args)]
struct ImportArgs {
    library: PathBuf,

    /// Stop after this many tracks
    #[arg(long)]
    limit: Option<usize>,

    /// Enrichment threads (0 = one per core) [default: 0]
    #[arg(long)]
    workers: Option<usize>,

    /// Store tracks as parsed, without catalog lookups
    #[arg(long)]
    no_enrich: bool,

    /// Write the enriched library to this .xml file
    #[arg(long)]
    export: Option<PathBuf>,

    /// Write batch statistics as JSON
    #[arg(long)]
    stats: Option<PathBuf>,

    /// Print status events as JSON lines instead of a progress bar
    #[arg(long)]
    events: bool,
}

#[derive(Args)]
struct EnrichArgs {
    /// Stored record key (Track ID, or #position)
    record_key: String,

    /// Look up the year even if the track already has one
    #[arg(long)]
    force: bool,
}

fn resolve_config(global: &GlobalArgs, workers: Option<usize>) -> Result<AppConfig> {
    let file_config = match &global.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let cli = CliConfig {
        db_path: global.db.clone(),
        workers,
        spotify_client_id: global.spotify_client_id.clone(),
        spotify_client_secret: global.spotify_client_secret.clone(),
        metric: global.metric,
        lenient: global.lenient.then_some(true),
        request_timeout_secs: global.timeout_secs,
    };
    AppConfig::resolve(&cli, file_config)
}

fn build_enricher(config: &AppConfig, enabled: bool) -> Result<Enricher> {
    let catalog: Option<Arc<dyn CatalogSearch>> = if !enabled {
        None
    } else if config.credentials.is_none() {
        warn!("Spotify credentials not configured; missing years will be stored as unknown");
        None
    } else {
        let client = SpotifyClient::new(config.credentials.clone(), config.enricher.request_timeout)
            .context("Failed to create Spotify client")?;
        Some(Arc::new(client) as Arc<dyn CatalogSearch>)
    };
    Ok(Enricher::new(catalog, config.enricher.clone()))
}

fn run_import(global: &GlobalArgs, args: &ImportArgs) -> Result<()> {
    let start = Instant::now();
    let config = resolve_config(global, args.workers)?;

    if let Some(export) = &args.export {
        validate_output_path(export, "xml", &[args.library.as_path(), config.db_path.as_path()])?;
    }

    let enricher = Arc::new(build_enricher(&config, !args.no_enrich)?);
    let job = ImportJob::spawn(
        ImportRequest {
            library: args.library.clone(),
            db_path: config.db_path.clone(),
            parse: ParseOptions { limit: args.limit },
            batch: BatchOptions {
                workers: config.workers,
                enrich: !args.no_enrich,
            },
            export: args.export.clone(),
        },
        enricher,
    )?;

    let cancel = job.cancel_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling after in-flight tracks finish...");
        cancel.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;

    let mut bar: Option<BarProgress> = None;
    for event in job.events() {
        if args.events {
            println!("{}", event.to_json());
            continue;
        }
        if let ProgressEvent::Progress { total, .. } = &event {
            bar.get_or_insert_with(|| BarProgress::new(*total, "Enriching", global.log_only));
        }
        if let Some(bar) = &bar {
            bar.report(&event);
        }
    }

    let report = job.wait()?;
    let elapsed = start.elapsed();

    if let Some(path) = &args.stats {
        let mut stats = report.stats.clone();
        stats.elapsed_seconds = elapsed.as_secs_f64();
        stats
            .write_to_file(path)
            .with_context(|| format!("Failed to write stats {}", path.display()))?;
    }

    if !args.events {
        print_summary(&report.stats, &report.status, elapsed);
    }

    match report.status {
        BatchStatus::Failed { reason } => bail!("Import failed: {}", reason),
        BatchStatus::Cancelled => bail!("Import cancelled"),
        _ => Ok(()),
    }
}

fn print_summary(stats: &BatchStats, status: &BatchStatus, elapsed: Duration) {
    println!("\n{:=<60}", "");
    println!("Import {}", status.as_str());
    println!("  Parsed:        {}", stats.parsed_records);
    println!("  Malformed:     {}", stats.parse_failures);
    println!("  Already dated: {}", stats.already_dated);
    println!("  Matched:       {} ({:.1}%)", stats.matched, stats.match_rate());
    println!("  No match:      {}", stats.no_match);
    println!("  Unavailable:   {}", stats.unavailable);
    println!(
        "  Catalog errors: {} (rate limited {}, timeouts {})",
        stats.service_errors, stats.rate_limited, stats.timeouts
    );
    println!("  Stored:        {}", stats.persisted);
    if stats.skipped_cancelled > 0 {
        println!("  Not attempted: {}", stats.skipped_cancelled);
    }
    println!("  Elapsed:       {}", format_duration(elapsed));
    println!("{:=<60}", "");
}

fn run_enrich(global: &GlobalArgs, args: &EnrichArgs) -> Result<()> {
    let config = resolve_config(global, None)?;
    let mut store = SqliteTrackStore::open(&config.db_path)
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))?;
    let mut row = store
        .get(&args.record_key)?
        .ok_or_else(|| PersistenceError::NotFound(args.record_key.clone()))?;

    let mut record = row.to_record();
    if args.force {
        record.year = None;
    }
    let enricher = build_enricher(&config, true)?;
    let outcome = enricher.enrich(&mut record);
    row.apply(&record);
    store.upsert(&row)?;

    info!(record = %args.record_key, ?outcome, "Enriched track");
    println!(
        "{}: year={} confidence={:.3}",
        record.display_label(),
        record.year.as_ref().map(|y| y.to_string()).unwrap_or_default(),
        record.enrichment.as_ref().map_or(0.0, |e| e.confidence)
    );
    Ok(())
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

fn print_table(rows: &[[String; 5]]) {
    println!(
        "{:<30} {:<24} {:<24} {:<8} {:<16}",
        "Name", "Artist", "Album", "Year", "Genre"
    );
    println!("{:-<106}", "");
    for [name, artist, album, year, genre] in rows {
        println!(
            "{:<30} {:<24} {:<24} {:<8} {:<16}",
            truncate(name, 30),
            truncate(artist, 24),
            truncate(album, 24),
            truncate(year, 8),
            truncate(genre, 16)
        );
    }
}

fn preview_row(record: &TrackRecord) -> [String; 5] {
    [
        record.name.clone().unwrap_or_default(),
        record.artist.clone().unwrap_or_default(),
        record.album.clone().unwrap_or_default(),
        record.year.as_ref().map(|y| y.to_string()).unwrap_or_default(),
        record.genre.clone().unwrap_or_default(),
    ]
}

fn run_preview(library: &Path, rows: usize, log_only: bool) -> Result<()> {
    let spinner = create_spinner("Reading library", log_only);
    let parsed = parse_library_file(library, &ParseOptions { limit: Some(rows) })?;
    spinner.finish_and_clear();

    let table: Vec<[String; 5]> = parsed.records.iter().map(preview_row).collect();
    print_table(&table);
    if parsed.failures > 0 {
        println!("({} malformed entries skipped)", parsed.failures);
    }
    Ok(())
}

fn run_list(global: &GlobalArgs, json: bool) -> Result<()> {
    let config = resolve_config(global, None)?;
    let store = SqliteTrackStore::open(&config.db_path)
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))?;
    let tracks = store.all()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tracks)?);
        return Ok(());
    }

    let table: Vec<[String; 5]> = tracks
        .iter()
        .map(|t| {
            [
                t.title.clone().unwrap_or_default(),
                t.artist.clone().unwrap_or_default(),
                t.album.clone().unwrap_or_default(),
                t.year.map(|y| y.to_string()).unwrap_or_default(),
                t.genre.clone().unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&table);
    println!("{} tracks", tracks.len());
    Ok(())
}

fn run_clear(global: &GlobalArgs) -> Result<()> {
    let config = resolve_config(global, None)?;
    let mut store = SqliteTrackStore::open(&config.db_path)
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))?;
    let deleted = store.delete_all()?;
    println!("Deleted {} tracks from {:?}", deleted, config.db_path);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    match &cli.cmd {
        Command::Import(args) => run_import(&cli.global, args),
        Command::Enrich(args) => run_enrich(&cli.global, args),
        Command::List { json } => run_list(&cli.global, *json),
        Command::Clear => run_clear(&cli.global),
        Command::Preview { library, rows } => run_preview(library, *rows, cli.global.log_only),
    }
}
