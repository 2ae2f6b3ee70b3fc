use std::env;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sheetcourier::autofetch::{Delivery, FolderMonitor, JsonFileStore, MappingStore};
use sheetcourier::commands::CommandRouter;
use sheetcourier::config::Settings;
use sheetcourier::owners::GroupOwners;
use sheetcourier::services::telegram::{run_bot, TelegramTransport};
use sheetcourier::services::{LocalDriveStorage, StorageBackend};
use sheetcourier::utils::format::{format_interval, format_local_time};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_help() {
    println!("sheetcourier {} - Delivers new spreadsheets from drive folders to chats", VERSION);
    println!();
    println!("USAGE:");
    println!("    sheetcourier [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help              Print help information");
    println!("    -v, --version           Print version information");
    println!("    --token <TOKEN>         Bot token (overrides TELEGRAM_BOT_TOKEN and settings)");
    println!("    --status                Print configured folder monitors and exit");
    println!();
    println!("CONFIG: ~/.sheetcourier/settings.json");
}

fn print_version() {
    println!("sheetcourier {}", VERSION);
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sheetcourier=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn mapping_store(settings: &Settings) -> io::Result<JsonFileStore> {
    settings
        .auto_fetch
        .storage_path()
        .map(JsonFileStore::new)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Could not determine mapping file path"))
}

/// Print the persisted mappings without starting the bot
async fn print_status(settings: &Settings) -> io::Result<()> {
    let store = mapping_store(settings)?;
    println!("  Mapping file: {}", store.path().display());
    let mappings = store.load_all().await.map_err(io::Error::other)?;
    if mappings.is_empty() {
        println!("  No auto-fetch mappings configured.");
        return Ok(());
    }

    let mut folder_ids: Vec<&String> = mappings.keys().collect();
    folder_ids.sort();
    for folder_id in folder_ids {
        let m = &mappings[folder_id];
        let status = if m.is_active { "active" } else { "paused" };
        println!("  {} [{}] {} → {}", m.nickname, status, folder_id, m.chat_id);
        println!(
            "      last file: {}  last check: {}  retries: {}",
            m.last_file_name.as_deref().unwrap_or("-"),
            format_local_time(&m.last_check_time),
            m.retry_count
        );
    }
    Ok(())
}

async fn serve(settings: Settings, token: String) -> io::Result<()> {
    let store = Arc::new(mapping_store(&settings)?);
    let storage = Arc::new(LocalDriveStorage::new(
        settings.drive.root.as_ref().map(PathBuf::from),
        &settings.drive.eligible_extensions,
    ));
    let transport = TelegramTransport::new(&token);

    let scratch_dir = settings.auto_fetch.scratch_path();
    tokio::fs::create_dir_all(&scratch_dir).await?;
    let delivery = Delivery::new(
        storage.clone(),
        Arc::new(transport.clone()),
        scratch_dir,
        settings.bot.name.clone(),
    );

    if storage.is_available() {
        println!("  ✓ Drive root: {}", settings.drive.root.as_deref().unwrap_or_default());
    } else {
        println!("  ⚠ Drive root not configured, folder monitoring disabled");
    }

    let monitor = FolderMonitor::new(&settings.auto_fetch, store, storage, delivery);
    match monitor.restore().await {
        Ok(count) => println!("  ✓ Loaded {count} auto-fetch mapping(s)"),
        Err(e) => {
            error!(error = %e, "failed to load auto-fetch mappings, starting empty");
            println!("  ⚠ Could not read mapping file, starting with no mappings");
        }
    }

    if settings.auto_fetch.enabled {
        let started = monitor.start_all();
        println!(
            "  ✓ Monitoring {started} folder(s) every {}",
            format_interval(monitor.check_interval())
        );
    } else {
        println!("  ⚠ Auto-fetch disabled in settings, restored monitors not started");
    }

    let owners = match settings.bot.owners_path() {
        Some(path) => GroupOwners::load(path),
        None => {
            println!("  ⚠ No config directory, group owners will not be saved");
            GroupOwners::in_memory()
        }
    };
    println!("  ✓ Loaded {} group owner(s)", owners.count());

    let router = Arc::new(CommandRouter::new(
        settings.bot.prefix.clone(),
        settings.bot.name.clone(),
        monitor.clone(),
        Arc::new(transport.clone()),
        Arc::new(owners),
    ));
    run_bot(transport, router, settings).await;

    monitor.shutdown().await;
    println!("  ✓ Stopped");
    Ok(())
}

fn main() -> io::Result<()> {
    let args: Vec<String> = env::args().collect();
    let mut token_arg: Option<String> = None;
    let mut status = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            "-v" | "--version" => {
                print_version();
                return Ok(());
            }
            "--status" => status = true,
            "--token" => {
                let Some(token) = args.get(i + 1) else {
                    eprintln!("Error: --token requires a value");
                    eprintln!("Usage: sheetcourier --token <TOKEN>");
                    return Ok(());
                };
                token_arg = Some(token.clone());
                i += 1;
            }
            other => {
                eprintln!("Unknown option: {}", other);
                eprintln!("Use --help for usage information");
                return Ok(());
            }
        }
        i += 1;
    }

    init_tracing();

    let settings = match Settings::load_with_error() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("  ⚠ {}, using default settings", e);
            Settings::default()
        }
    };

    let runtime = tokio::runtime::Runtime::new()?;
    if status {
        return runtime.block_on(print_status(&settings));
    }

    let Some(token) = settings.resolve_token(token_arg.as_deref()) else {
        eprintln!("Error: no bot token configured.");
        eprintln!("Pass --token, set TELEGRAM_BOT_TOKEN, or add bot.telegram_token to settings.json");
        return Ok(());
    };

    println!("sheetcourier {}", VERSION);
    runtime.block_on(serve(settings, token))
}
