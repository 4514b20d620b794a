pub mod chat;
pub mod init;
pub mod query;
pub mod status;
pub mod tools;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use stockchat_config::AppConfig;
use stockchat_core::store::StockStore;
use stockchat_core::tool::ToolRegistry;
use stockchat_store::SqliteStockStore;
use tracing::debug;

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

pub fn load_config(path: Option<&Path>) -> Result<AppConfig, Box<dyn std::error::Error>> {
    AppConfig::load_with(path).map_err(|e| format!("Failed to load config: {e}").into())
}

/// The file behind a `sqlite://` URL, if it names one.
fn database_file(url: &str) -> Option<PathBuf> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next().unwrap_or_default();
    (!path.is_empty() && path != ":memory:").then(|| PathBuf::from(path))
}

/// Open (and migrate) the configured database, creating its directory.
pub async fn open_store(config: &AppConfig) -> Result<Arc<SqliteStockStore>, Box<dyn std::error::Error>> {
    if let Some(parent) = database_file(&config.database.url)
        .as_deref()
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent)?;
    }

    let store = SqliteStockStore::connect(&config.database.url, config.database.max_connections)
        .await
        .map_err(|e| format!("Failed to open database {}: {e}", config.database.url))?;
    debug!(url = %config.database.url, "Stock database opened");
    Ok(Arc::new(store))
}

pub fn build_registry(store: Arc<SqliteStockStore>, config: &AppConfig) -> ToolRegistry {
    let store: Arc<dyn StockStore> = store;
    stockchat_tools::stock_registry(store, config)
}
