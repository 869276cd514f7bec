//! Main entry point for camroll, the randomized camera-roll feed engine.

use api_client::{RecordStoreClient, StorageClient};
use cache::CacheManager;
use clap::{Parser, Subcommand};
use delivery::{
    Acquirer, ClientCapabilities, DeliveryKind, DeviceClass, FileSaveSink, NativeShareSink,
    OpenFallbackSink,
};
use feed::{DateMap, DateResolver, FeedConfig, MediaKind, SharedFeedState};
use playback::{PlaybackManager, PlayerCommand, Prefetcher, ReleasePolicy};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing_appender::rolling;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;
use viewport::{Signal, VisibilityTracker};

mod config;

#[derive(Parser)]
#[command(name = "camroll", author, version, about = "Randomized camera-roll feed engine")]
struct Cli {
    /// Override log level (e.g. info, debug)
    #[arg(long)]
    log_level: Option<String>,
    /// Override the storage service base URL
    #[arg(long)]
    supabase_url: Option<String>,
    /// Override the logical folder inside both buckets
    #[arg(long)]
    folder: Option<String>,
    /// Override the prefetch-ahead distance K
    #[arg(long)]
    prefetch_ahead: Option<usize>,
    /// Override the device class (desktop, mobile)
    #[arg(long)]
    device_class: Option<String>,
    /// Path to a precomputed date map JSON file
    #[arg(long)]
    date_map: Option<PathBuf>,
    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Seed for the feed shuffle (random if omitted)
    #[arg(long)]
    seed: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble the feed and print its order
    Assemble,
    /// Assemble the feed and resolve every entry's capture-date label
    ResolveDates,
    /// Fetch and deliver one entry, marking it consumed
    Acquire {
        /// Entry id, e.g. photos/2025/001.jpg
        id: String,
    },
    /// Write the effective configuration to the config file
    SaveConfig,
    /// Drive a scripted scroll over the feed and print lifecycle decisions
    Simulate {
        /// Scroll increment in pixels per step
        #[arg(long, default_value_t = 250.0)]
        step: f64,
        /// Viewport height in pixels
        #[arg(long, default_value_t = 844.0)]
        viewport: f64,
    },
}

struct Context {
    storage: StorageClient,
    record_store: RecordStoreClient,
    cache: CacheManager,
    cfg: config::AppConfig,
    feed_cfg: FeedConfig,
    caps: ClientCapabilities,
}

fn build_context(cfg: config::AppConfig) -> Result<Context, Box<dyn std::error::Error>> {
    let base_url = if cfg.supabase_url.is_empty() {
        std::env::var("CAMROLL_SUPABASE_URL").unwrap_or_default()
    } else {
        cfg.supabase_url.clone()
    };
    let anon_key = std::env::var("CAMROLL_ANON_KEY").unwrap_or_default();
    if base_url.is_empty() || anon_key.is_empty() {
        return Err("CAMROLL_SUPABASE_URL (or supabase_url in config) and CAMROLL_ANON_KEY must be set".into());
    }

    std::fs::create_dir_all(&cfg.cache_path)?;
    let cache = CacheManager::new(&cfg.cache_path.join("cache.sqlite"))?;

    let feed_cfg = FeedConfig {
        photo_bucket: cfg.photo_bucket.clone(),
        video_bucket: cfg.video_bucket.clone(),
        folder: cfg.folder.clone(),
        page_size: cfg.page_size,
    };
    let caps = ClientCapabilities {
        native_share: cfg.native_share,
        device_class: match cfg.device_class.as_str() {
            "mobile" => DeviceClass::Mobile,
            _ => DeviceClass::Desktop,
        },
    };

    Ok(Context {
        storage: StorageClient::new(base_url.clone(), anon_key.clone()),
        record_store: RecordStoreClient::new(base_url, anon_key),
        cache,
        cfg,
        feed_cfg,
        caps,
    })
}

fn load_date_map(path: Option<&PathBuf>) -> DateMap {
    let Some(path) = path else {
        return DateMap::default();
    };
    match std::fs::read_to_string(path) {
        Ok(json) => match DateMap::from_json_str(&json) {
            Ok(map) => {
                tracing::info!(count = map.len(), "loaded precomputed date map");
                map
            }
            Err(e) => {
                tracing::warn!(%e, "date map unusable, falling back to later tiers");
                DateMap::default()
            }
        },
        Err(e) => {
            tracing::warn!(%e, path = %path.display(), "date map missing, falling back to later tiers");
            DateMap::default()
        }
    }
}

async fn load_feed(ctx: &Context, seed: Option<u64>) -> SharedFeedState {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let state = feed::build_feed_state(&ctx.storage, &ctx.feed_cfg, &mut rng)
        .await
        .shared();
    let acquirer = Acquirer::new(
        ctx.storage.clone(),
        ctx.record_store.clone(),
        ctx.cache.clone(),
        ctx.caps,
    );
    acquirer.bootstrap_consumption(&state).await;
    state
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let overrides = config::AppConfigOverrides {
        log_level: cli.log_level.clone(),
        supabase_url: cli.supabase_url.clone(),
        folder: cli.folder.clone(),
        prefetch_ahead: cli.prefetch_ahead,
        device_class: cli.device_class.clone(),
        date_map_path: cli.date_map.clone(),
    };
    let cfg = config::AppConfig::load_from(cli.config.clone()).apply_overrides(&overrides);

    std::fs::create_dir_all(&cfg.cache_path)?;
    let file_appender = rolling::daily(&cfg.cache_path, "camroll.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(cfg.log_level.clone()))
        .with_writer(std::io::stderr.and(file_writer))
        .init();

    match cli.command {
        // needs no storage credentials, so no context setup
        Commands::SaveConfig => {
            cfg.save_to(cli.config.clone())?;
            println!("Configuration saved");
            return Ok(());
        }
        command => {
            let ctx = match build_context(cfg) {
                Ok(ctx) => ctx,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return Ok(());
                }
            };
            run(&ctx, command, cli.seed).await?;
        }
    }

    Ok(())
}

async fn run(
    ctx: &Context,
    command: Commands,
    seed: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Assemble => {
            let state = load_feed(ctx, seed).await;
            let guard = state.lock().expect("feed state");
            for (i, entry) in guard.entries.iter().enumerate() {
                let kind = match entry.kind {
                    MediaKind::Photo => "photo",
                    MediaKind::Video => "video",
                };
                let consumed = if guard.is_consumed(&entry.id) { " (consumed)" } else { "" };
                println!("{:4}  {}  {}{}", i, kind, entry.id, consumed);
            }
            println!("{} entries", guard.entries.len());
        }
        Commands::ResolveDates => {
            let state = load_feed(ctx, seed).await;
            let date_map = load_date_map(ctx.cfg.date_map_path.as_ref());
            let mut resolver =
                DateResolver::new(ctx.storage.clone(), ctx.cache.clone(), date_map);
            resolver.resolve_all(&state).await;

            let guard = state.lock().expect("feed state");
            for entry in &guard.entries {
                println!("{}  {}", entry.id, guard.label(&entry.id).unwrap_or("(pending)"));
            }
        }
        Commands::Acquire { id } => {
            let state = load_feed(ctx, seed).await;
            let entry = {
                let guard = state.lock().expect("feed state");
                guard.entries.iter().find(|e| e.id == id).cloned()
            };
            let Some(entry) = entry else {
                println!("Entry not found: {}", id);
                return Ok(());
            };

            let acquirer = Acquirer::new(
                ctx.storage.clone(),
                ctx.record_store.clone(),
                ctx.cache.clone(),
                ctx.caps,
            );
            let outcome = match acquirer.strategy() {
                DeliveryKind::NativeShare => {
                    let sink = NativeShareSink::default();
                    let outcome = acquirer.acquire(&state, &entry, &sink).await;
                    for name in sink.shared() {
                        println!("Share: {}", name);
                    }
                    outcome
                }
                DeliveryKind::DirectSave => {
                    let sink = FileSaveSink::new(ctx.cfg.save_dir.clone());
                    acquirer.acquire(&state, &entry, &sink).await
                }
                DeliveryKind::OpenFallback => {
                    let sink = OpenFallbackSink::default();
                    let outcome = acquirer.acquire(&state, &entry, &sink).await;
                    for url in sink.opened() {
                        println!("Open: {}", url);
                    }
                    outcome
                }
            };
            match outcome {
                Ok(o) => println!("{:?}", o),
                Err(e) => println!("Acquire failed: {}", e),
            }
        }
        // handled in main before context setup
        Commands::SaveConfig => {}
        Commands::Simulate { step, viewport } => {
            simulate(ctx, seed, step, viewport).await;
        }
    }

    Ok(())
}

// Scroll-axis layout of the simulated page: 440px media frames on a 500px
// pitch, first frame 424px from the top.
const ITEM_TOP: f64 = 424.0;
const ITEM_HEIGHT: f64 = 440.0;
const ITEM_PITCH: f64 = 500.0;

async fn simulate(ctx: &Context, seed: Option<u64>, step: f64, viewport_height: f64) {
    let state = load_feed(ctx, seed).await;
    let (entry_count, k) = {
        let guard = state.lock().expect("feed state");
        (guard.entries.len(), ctx.cfg.prefetch_ahead)
    };
    if entry_count == 0 {
        println!("Feed is empty, nothing to simulate");
        return;
    }

    let policy = match ctx.caps.device_class {
        DeviceClass::Mobile => ReleasePolicy::RetainOutsideWindow,
        DeviceClass::Desktop => ReleasePolicy::ReleaseOutsideWindow,
    };
    let mut tracker = VisibilityTracker::with_defaults(entry_count);
    let mut manager = {
        let guard = state.lock().expect("feed state");
        PlaybackManager::new(&guard, k, policy)
    };
    let prefetcher = Prefetcher::new(ctx.storage.clone());

    let feed_bottom = ITEM_TOP + (entry_count - 1) as f64 * ITEM_PITCH + ITEM_HEIGHT;
    let mut scroll = 0.0;
    while scroll < feed_bottom {
        let mut signals = Vec::new();
        for i in 0..entry_count {
            let item_top = ITEM_TOP + i as f64 * ITEM_PITCH;
            signals.extend(tracker.observe_geometry(i, scroll, viewport_height, item_top, ITEM_HEIGHT));
        }

        for signal in signals {
            let commands = match signal {
                Signal::Crossed(index) => manager.on_active_index(index),
                Signal::Playable { index, playable } => manager.on_playable(index, playable),
            };
            execute(&state, &prefetcher, &mut manager, commands).await;
        }

        scroll += step;
    }
    println!("Simulated scroll complete (active index {})", manager.active_index());
}

async fn execute(
    state: &SharedFeedState,
    prefetcher: &Prefetcher,
    manager: &mut PlaybackManager,
    commands: Vec<PlayerCommand>,
) {
    for command in commands {
        match command {
            PlayerCommand::PreloadMetadata { index, epoch } => {
                let url = entry_url(state, index);
                println!("preload  #{}", index);
                match prefetcher.preload(&url).await {
                    Ok(()) => manager.preload_finished(index, epoch),
                    Err(e) => tracing::debug!(index, %e, "metadata preload failed"),
                }
            }
            PlayerCommand::DecodePhoto { index, .. } => println!("decode   #{}", index),
            PlayerCommand::Play { index } => println!("play     #{}", index),
            PlayerCommand::Pause { index, .. } => println!("pause    #{}", index),
            PlayerCommand::Release { index } => println!("release  #{}", index),
        }
    }
}

fn entry_url(state: &SharedFeedState, index: usize) -> String {
    let Ok(guard) = state.lock() else {
        return String::new();
    };
    guard
        .entries
        .get(index)
        .and_then(|e| guard.url(&e.id))
        .unwrap_or_default()
        .to_string()
}
