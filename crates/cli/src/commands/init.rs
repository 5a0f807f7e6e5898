use std::path::Path;

use rostersync_core::config::EngineConfig;
use rostersync_core::store::SqliteStore;
use tracing::info;

/// Run the `init` command: create the data directory, write a default config,
/// and create the state database.
pub async fn run(data_dir: &str) -> anyhow::Result<()> {
    let data_path = Path::new(data_dir);

    if !data_path.exists() {
        std::fs::create_dir_all(data_path)?;
        info!("Created data directory: {}", data_dir);
    }

    let db_path = data_path.join("state.db");
    let db_path_str = db_path.to_string_lossy().to_string();

    let mut config = EngineConfig::generate_default();
    config.engine.database_path = db_path_str.clone();

    let config_path = data_path.join("rostersync.toml");
    if config_path.exists() {
        anyhow::bail!(
            "Refusing to overwrite existing configuration at {}",
            config_path.display()
        );
    }
    let toml_str = toml::to_string_pretty(&config)?;
    std::fs::write(&config_path, &toml_str)?;
    info!("Wrote configuration to {}", config_path.display());

    SqliteStore::connect(&db_path_str).await?;
    info!("Database initialized at {}", db_path_str);

    println!("rostersync initialized successfully!");
    println!("  Data directory: {}", data_dir);
    println!("  Configuration:  {}", config_path.display());
    println!("  Database:       {}", db_path_str);
    println!();
    println!("Next steps:");
    println!(
        "  1. Edit {} and add a [[providers]] entry per SIS",
        config_path.display()
    );
    println!(
        "  2. Run `rostersync --config {} test-connection --tenant <t> --provider <p>`",
        config_path.display()
    );
    println!(
        "  3. Run `rostersync --config {} sync` to perform the first sync",
        config_path.display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_creates_files_in_temp_dir() {
        let temp = tempfile::tempdir().unwrap();
        let data_path = temp.path().join("rostersync");
        let data_dir = data_path.to_string_lossy().to_string();

        run(&data_dir).await.unwrap();

        let config_path = data_path.join("rostersync.toml");
        let content = std::fs::read_to_string(&config_path).unwrap();
        let config: EngineConfig = toml::from_str(&content).unwrap();
        config.validate().unwrap();
        assert_eq!(
            config.engine.database_path,
            data_path.join("state.db").to_string_lossy()
        );
        assert!(!config.providers.is_empty());
        assert!(data_path.join("state.db").exists());
    }

    #[tokio::test]
    async fn init_does_not_overwrite_config() {
        let temp = tempfile::tempdir().unwrap();
        let data_dir = temp.path().to_string_lossy().to_string();
        run(&data_dir).await.unwrap();

        let err = run(&data_dir).await.unwrap_err();
        assert!(err.to_string().contains("Refusing to overwrite"));
    }
}
