use std::sync::Arc;
use std::time::Instant;

use rostersync_core::config::{EngineConfig, ProviderConfig};
use rostersync_core::coordinator::{SyncJob, SyncRunCoordinator};
use rostersync_core::models::sync::{SyncRunReport, SyncRunStatus};
use rostersync_core::providers::build_adapter;
use rostersync_core::token::CredentialStore;
use tracing::{info, warn};

use super::{load_config, open_store};

/// Run the `sync` command: sync every selected provider and print a summary.
pub async fn run(
    config_path: &str,
    tenant: Option<&str>,
    provider: Option<&str>,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    let selected = select(&config, tenant, provider);
    if selected.is_empty() {
        warn!("No enabled providers match the selection");
        println!("No enabled providers to sync. Enable one in your config file first.");
        return Ok(());
    }

    let store = open_store(&config).await?;
    let credential_store: Arc<dyn CredentialStore> = store.clone();
    let ctx = config.adapter_context(Some(credential_store))?;

    let mut jobs = Vec::with_capacity(selected.len());
    for provider in selected {
        jobs.push(SyncJob {
            adapter: build_adapter(provider, &ctx)?,
            credentials: provider.credentials(),
        });
    }

    let coordinator = SyncRunCoordinator::from_config(&config, store.clone(), store.clone());
    println!("Starting sync of {} provider(s)...", jobs.len());
    let start = Instant::now();
    let reports = coordinator.run_many(jobs).await;
    let elapsed = start.elapsed();

    for report in &reports {
        print_report(report);
    }
    println!("Finished in {:.1}s", elapsed.as_secs_f64());
    info!(runs = reports.len(), elapsed_ms = elapsed.as_millis() as u64, "Sync finished");

    let failed = reports
        .iter()
        .filter(|r| r.status == SyncRunStatus::Failed)
        .count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} sync run(s) failed", reports.len());
    }
    Ok(())
}

/// Enabled providers matching the optional tenant and provider filters.
fn select<'a>(
    config: &'a EngineConfig,
    tenant: Option<&str>,
    provider: Option<&str>,
) -> Vec<&'a ProviderConfig> {
    config
        .enabled_providers()
        .filter(|p| tenant.map_or(true, |t| p.tenant_id == t))
        .filter(|p| provider.map_or(true, |id| p.id == id))
        .collect()
}

fn print_report(report: &SyncRunReport) {
    println!();
    println!("{}/{}: {}", report.tenant_id, report.provider_id, report.status.as_str());
    for (entity_type, stats) in &report.stats.entities {
        println!(
            "  {:<13} fetched {:>6}  created {:>5}  updated {:>5}  unchanged {:>6}  deactivated {:>5}  errors {:>4}",
            entity_type.as_str(),
            stats.fetched,
            stats.created,
            stats.updated,
            stats.unchanged,
            stats.deactivated,
            stats.errors
        );
    }
    for message in report.error_messages.iter().take(10) {
        println!("  ! {message}");
    }
    if report.error_messages.len() > 10 {
        println!("  ... and {} more", report.error_messages.len() - 10);
    }
}
