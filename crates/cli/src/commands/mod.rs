pub mod disconnect;
pub mod init;
pub mod status;
pub mod sync;
pub mod test_connection;

use std::path::Path;
use std::sync::Arc;

use rostersync_core::config::{EngineConfig, ProviderConfig};
use rostersync_core::store::SqliteStore;
use tracing::info;

/// Load and validate the configuration file.
pub fn load_config(config_path: &str) -> anyhow::Result<EngineConfig> {
    let config = EngineConfig::load(Path::new(config_path))?;
    config.validate()?;
    info!("Loaded configuration from {}", config_path);
    Ok(config)
}

/// Open the state database named in `[engine]`.
pub async fn open_store(config: &EngineConfig) -> anyhow::Result<Arc<SqliteStore>> {
    let store = SqliteStore::connect(&config.engine.database_path).await?;
    Ok(Arc::new(store))
}

/// A configured provider, or an error naming the missing pairing.
pub fn find_provider<'a>(
    config: &'a EngineConfig,
    tenant: &str,
    provider: &str,
) -> anyhow::Result<&'a ProviderConfig> {
    config
        .provider(tenant, provider)
        .ok_or_else(|| anyhow::anyhow!("No provider {provider} configured for tenant {tenant}"))
}
