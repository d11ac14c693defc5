//! SkyWatch CLI
//!
//! Standing watch over restricted airspace from a public ADS-B feed.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use skywatch_core::{FilterMode, GeofenceSet, HexFilter, DEFAULT_FEED_BASE};
use skywatch_net::{
    create_client, default_lock_path, notifier_from_config, FeedConfig, Fetcher, HttpTransport,
    RateLimiter, TelegramConfig, DEFAULT_MIN_INTERVAL,
};
use skywatch_runtime::{Watch, WatchConfig};
use skywatch_tracker::{ContactTracker, CsvContactLog};

#[derive(Parser)]
#[command(name = "skywatch")]
#[command(author, version, about = "SkyWatch: geofenced ADS-B contact tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (0-3)
    #[arg(short, long, default_value = "1", global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the feed until interrupted
    Watch {
        #[command(flatten)]
        args: WatchArgs,
    },

    /// Run a single cycle and exit
    Once {
        #[command(flatten)]
        args: WatchArgs,
    },

    /// Show the boundaries, filter and store that would be used, without polling
    Check {
        #[command(flatten)]
        args: WatchArgs,
    },
}

#[derive(Args, Clone)]
struct WatchArgs {
    /// Seconds between cycle starts
    #[arg(long, default_value = "60")]
    interval: u64,

    /// Contact store (CSV)
    #[arg(long, default_value = "nttr_contacts.csv", env = "SKYWATCH_CSV")]
    csv: PathBuf,

    /// Send Telegram notifications for new and military contacts
    #[arg(long)]
    notify_telegram: bool,

    /// Telegram bot token (or set TELEGRAM_BOT_TOKEN env var)
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    telegram_token: Option<String>,

    /// Telegram chat id (or set TELEGRAM_CHAT_ID env var)
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    telegram_chat_id: Option<String>,

    /// Newline-delimited hex glob patterns
    #[arg(long, env = "SKYWATCH_HEX_FILTER")]
    hex_filter_file: Option<PathBuf>,

    /// Keep only matching hexes, or drop them
    #[arg(long, value_enum, default_value = "include")]
    hex_filter_mode: ModeArg,

    /// Boundary file (GeoJSON or {"polygons": ...}); built-in boxes when absent
    #[arg(long, env = "SKYWATCH_POLYGONS")]
    polygons_file: Option<PathBuf>,

    /// Print every in-zone contact each cycle
    #[arg(long)]
    print_all: bool,

    /// Host-wide rate limiter lock file
    #[arg(long, env = "SKYWATCH_LOCK_FILE")]
    lock_file: Option<PathBuf>,

    /// Minimum milliseconds between upstream requests, across all processes
    #[arg(long, default_value_t = DEFAULT_MIN_INTERVAL.as_millis() as u64)]
    min_request_ms: u64,

    /// Feed API root
    #[arg(long, default_value = DEFAULT_FEED_BASE, env = "SKYWATCH_FEED_URL")]
    feed_url: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Include,
    Exclude,
}

impl From<ModeArg> for FilterMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Include => FilterMode::Include,
            ModeArg::Exclude => FilterMode::Exclude,
        }
    }
}

impl WatchArgs {
    fn lock_path(&self) -> PathBuf {
        self.lock_file.clone().unwrap_or_else(default_lock_path)
    }

    fn telegram(&self) -> Option<TelegramConfig> {
        TelegramConfig::from_parts(self.telegram_token.clone(), self.telegram_chat_id.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match cli.command {
        Commands::Watch { args } => run_watch(args).await?,
        Commands::Once { args } => run_once(args).await?,
        Commands::Check { args } => check(&args),
    }

    Ok(())
}

fn build_watch(args: &WatchArgs) -> Result<Watch> {
    let feed_config = FeedConfig {
        base_url: args.feed_url.clone(),
        ..Default::default()
    };
    let client = create_client(&feed_config)?;

    let limiter = RateLimiter::new(args.lock_path(), Duration::from_millis(args.min_request_ms));
    let transport = HttpTransport::new(client.clone()).shared();
    let fetcher = Fetcher::new(transport, limiter, feed_config);

    let geofence = GeofenceSet::load_or_fallback(args.polygons_file.as_deref());
    let hex_filter = HexFilter::load(args.hex_filter_file.as_deref(), args.hex_filter_mode.into());
    let tracker = ContactTracker::open(Box::new(CsvContactLog::new(&args.csv)));

    let notifier = args
        .notify_telegram
        .then(|| notifier_from_config(client, args.telegram()));

    let config = WatchConfig {
        interval: Duration::from_secs(args.interval),
        print_all: args.print_all,
    };

    Ok(Watch::new(fetcher, geofence, hex_filter, tracker, notifier, config))
}

async fn run_watch(args: WatchArgs) -> Result<()> {
    println!("🛰️  SkyWatch - watching {} every {}s", args.feed_url, args.interval);
    println!("📄 Contacts: {}\n", args.csv.display());

    let mut watch = build_watch(&args)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, finishing current cycle");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!("Cannot listen for Ctrl-C: {}", e);
                // Hold the sender so the watch keeps running
                std::future::pending::<()>().await;
            }
        }
    });

    watch.run(shutdown_rx).await?;
    println!("\n👋 Stopped after {} cycles", watch.cycles());
    Ok(())
}

async fn run_once(args: WatchArgs) -> Result<()> {
    let mut watch = build_watch(&args)?;
    let report = watch.run_cycle().await;

    println!("\n📊 Cycle summary:");
    println!("   Records fetched: {}", report.fetched);
    println!("   Contacts in zone: {}", report.in_zone);
    println!("   New contacts: {}", report.new_contacts.len());
    println!("   Anomalous contacts: {}", report.anomalies.len());
    if !report.failed_sources.is_empty() {
        println!("   ⚠️  Sources without data: {}", report.failed_sources.join(", "));
    }
    Ok(())
}

fn check(args: &WatchArgs) {
    println!("🔍 SkyWatch configuration check\n");

    let geofence = GeofenceSet::load_or_fallback(args.polygons_file.as_deref());
    if geofence.is_fallback() {
        println!("⚠️  Boundaries: {}", geofence.source());
    } else {
        println!("✅ Boundaries: {}", geofence.source());
    }
    for (i, polygon) in geofence.polygons().iter().enumerate() {
        println!(
            "   {}. {} ({} vertices, {} holes)",
            i + 1,
            polygon.name.as_deref().unwrap_or("unnamed"),
            polygon.exterior().vertices().len(),
            polygon.holes().len()
        );
    }

    let mode: FilterMode = args.hex_filter_mode.into();
    let hex_filter = HexFilter::load(args.hex_filter_file.as_deref(), mode);
    if hex_filter.is_empty() {
        println!("✅ Hex filter: none (all hexes pass)");
    } else {
        println!("✅ Hex filter: {} patterns ({})", hex_filter.len(), hex_filter.mode());
    }

    let tracker = ContactTracker::open(Box::new(CsvContactLog::new(&args.csv)));
    println!(
        "✅ Contact store: {} ({} known contacts)",
        args.csv.display(),
        tracker.known_count()
    );

    println!("✅ Rate limiter: {} ({} ms)", args.lock_path().display(), args.min_request_ms);
    println!("✅ Feed: {}", args.feed_url);

    match (args.notify_telegram, args.telegram()) {
        (false, _) => println!("ℹ️  Notifications: disabled"),
        (true, Some(config)) => println!("✅ Notifications: Telegram chat {}", config.chat_id),
        (true, None) => {
            println!("⚠️  Notifications: Telegram requested but TELEGRAM_BOT_TOKEN / TELEGRAM_CHAT_ID unset");
            println!("   Messages will only be logged");
        }
    }
}
