use rostersync_core::providers::build_adapter;
use tracing::{error, info};

use super::{find_provider, load_config};

/// Run the `test-connection` command: initialize one provider's adapter
/// without syncing anything.
pub async fn run(config_path: &str, tenant: &str, provider: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let provider_config = find_provider(&config, tenant, provider)?;

    // No credential store: a probe must not reuse or persist tokens.
    let ctx = config.adapter_context(None)?;
    let adapter = build_adapter(provider_config, &ctx)?;

    println!("Testing {}/{} ({})", tenant, provider, adapter.kind());
    let caps = adapter.capabilities();
    println!(
        "Capabilities: change feed: {}, deletion scan: {}, modified-since: {}",
        caps.supports_delta, caps.supports_deletion_detection, caps.supports_modified_since
    );

    match adapter.initialize(&provider_config.credentials()).await {
        Ok(()) => {
            println!("Connection test: SUCCESS");
            info!(tenant, provider, "Connection test passed");
            adapter.disconnect().await?;
            Ok(())
        }
        Err(e) => {
            println!("Connection test: FAILED - {e}");
            error!(tenant, provider, error = %e, "Connection test failed");
            Err(e.into())
        }
    }
}
