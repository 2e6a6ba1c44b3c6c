pub mod config;
pub mod console;
pub mod db;
pub mod error;
pub mod logger;
pub mod models;
pub mod session;
pub mod store;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};

use config::{AppConfig, StoreBackend};
use db::Database;
use logger::ProcessLauncher;
use session::SessionController;
use store::{RatingsStore, SupabaseStore};

fn open_store(config: &AppConfig) -> Result<Arc<dyn RatingsStore>> {
    match config.store_backend() {
        StoreBackend::Supabase { url, key } => {
            info!("Using Supabase store at {url}");
            Ok(Arc::new(SupabaseStore::new(&url, &key)?))
        }
        StoreBackend::Sqlite(path) => {
            info!("SUPABASE_URL/SUPABASE_KEY not set; using local store");
            Ok(Arc::new(Database::new(path)?))
        }
    }
}

pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    utils::logging::init();

    info!("Brainplaner starting up...");

    let config = AppConfig::load().context("failed to load configuration")?;
    info!("Project root: {}", config.project_root.display());

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(async move {
        let store = open_store(&config)?;

        let launcher = ProcessLauncher::new(&config.logger, &config.project_root);
        if !launcher.program().exists() {
            warn!(
                "Logger program {} not found; sessions will start without a logger",
                launcher.program().display()
            );
        }

        let controller = SessionController::new(store, Arc::new(launcher), config.device.clone());
        console::run(controller).await
    })
}
