use rostersync_core::store::StateStore;

use super::{load_config, open_store};

/// Run the `status` command: show the last run and active record counts of
/// every configured provider.
pub async fn run(config_path: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config).await?;

    let db_size = std::fs::metadata(&config.engine.database_path)
        .map(|m| format_bytes(m.len()))
        .unwrap_or_else(|_| "unknown".to_string());

    println!("rostersync Status");
    println!("=================");
    println!("Database: {} ({})", config.engine.database_path, db_size);
    println!("Providers: {}", config.providers.len());

    for provider in &config.providers {
        println!();
        let header = format!(
            "{}/{} ({}{})",
            provider.tenant_id,
            provider.id,
            provider.kind,
            if provider.enabled { "" } else { ", disabled" }
        );
        println!("{header}");
        println!("{}", "-".repeat(header.len()));

        match store.latest_run(&provider.tenant_id, &provider.id).await? {
            Some(run) => {
                println!("Last run:  {}", run.status.as_str());
                println!(
                    "Started:   {}",
                    run.started_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
                if let Some(completed) = run.completed_at {
                    println!("Completed: {}", completed.format("%Y-%m-%d %H:%M:%S UTC"));
                }
                let totals = run.stats.totals();
                println!(
                    "Changes:   {} created, {} updated, {} deactivated, {} errors",
                    totals.created, totals.updated, totals.deactivated, totals.errors
                );
                if let Some(first) = run.error_messages.first() {
                    println!("Error:     {first}");
                }
            }
            None => println!("No sync runs recorded."),
        }

        let counts = store.active_counts(&provider.tenant_id, &provider.id).await?;
        for (entity_type, count) in counts {
            println!("  {:<13} {}", entity_type.as_str(), count);
        }
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bytes_displays_correctly() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1048576), "1.0 MB");
        assert_eq!(format_bytes(1073741824), "1.0 GB");
    }

    #[tokio::test]
    async fn status_runs_against_fresh_database() {
        let temp = tempfile::tempdir().unwrap();
        let db_path = temp.path().join("state.db");
        let config_path = temp.path().join("rostersync.toml");
        std::fs::write(
            &config_path,
            format!(
                "[engine]\ndatabase_path = {:?}\n\n[[providers]]\nid = \"csv\"\ntenant_id = \"t1\"\nkind = \"oneroster_csv\"\ncsv_dir = \"/srv/drop\"\n",
                db_path.to_string_lossy()
            ),
        )
        .unwrap();

        run(config_path.to_str().unwrap()).await.unwrap();
        assert!(db_path.exists());
    }
}
