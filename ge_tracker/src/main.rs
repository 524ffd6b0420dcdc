//! GE Tracker - Grand Exchange price cache
//!
//! Keeps a local SQLite copy of OSRS Wiki prices fresh and serves it over HTTP.
//! Runs continuously until Ctrl-C.

use clap::Parser;
use ge_tracker::{PriceService, Store, TrackerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Grand Exchange price tracker - caches OSRS Wiki prices in SQLite
#[derive(Parser, Debug)]
#[command(name = "ge_tracker")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the SQLite database file
    #[arg(short, long, default_value_t = default_db_path())]
    database: String,

    /// Refresh once and exit (default: run continuously)
    #[arg(long, default_value_t = false)]
    once: bool,

    /// Refresh interval in seconds when running continuously
    #[arg(long, default_value_t = 60)]
    interval_secs: u64,

    /// Sync the item catalog from the Wiki mapping endpoint before starting
    #[arg(long, default_value_t = false)]
    sync_items: bool,

    /// Enable the HTTP API on the specified port (default: disabled)
    #[arg(long)]
    web_port: Option<u16>,

    /// Override the latest prices endpoint
    #[arg(long)]
    latest_url: Option<String>,

    /// Override the item mapping endpoint
    #[arg(long)]
    mapping_url: Option<String>,
}

impl Args {
    fn config(&self) -> TrackerConfig {
        let mut config = TrackerConfig {
            refresh_interval: Duration::from_secs(self.interval_secs.max(1)),
            ..TrackerConfig::default()
        };
        if let Some(url) = &self.latest_url {
            config.latest_url = url.clone();
        }
        if let Some(url) = &self.mapping_url {
            config.mapping_url = url.clone();
        }
        config
    }
}

/// Returns the default database path: ~/.local/share/ge_tracker/ge_tracker.db
fn default_db_path() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ge_tracker")
        .join("ge_tracker.db")
        .to_string_lossy()
        .to_string()
}

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let db_path = PathBuf::from(&args.database);

    log::info!("Starting ge_tracker...");
    log::info!("Database path: {}", db_path.display());

    let store = match Store::open(&db_path) {
        Ok(store) => store,
        Err(e) => {
            log::error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    let service = match PriceService::new(store, args.config()) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            log::error!("Failed to initialize price service: {}", e);
            std::process::exit(1);
        }
    };

    if args.sync_items {
        if let Err(e) = service.sync_items().await {
            log::error!("Failed to sync item catalog: {}", e);
        }
    }

    if args.once {
        service.refresh(true).await;
        shutdown(&service);
        return;
    }

    service.start_auto_refresh();

    // Spawn web server if --web-port specified
    let web = args.web_port.map(|port| {
        let web_service = Arc::clone(&service);
        tokio::spawn(async move {
            if let Err(e) = ge_tracker::web::serve(web_service, port, wait_for_ctrl_c()).await {
                log::error!("Web server error: {}", e);
            }
        })
    });

    wait_for_ctrl_c().await;
    log::info!("Shutdown requested");

    if let Some(web) = web {
        if let Err(e) = web.await {
            log::error!("Web server task failed: {}", e);
        }
    }

    shutdown(&service);
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
    }
}

fn shutdown(service: &PriceService) {
    match service.cleanup() {
        Ok(()) => log::info!("Shutdown complete."),
        Err(e) => log::error!("Cleanup failed: {}", e),
    }
}
