use rostersync_core::store::StateStore;
use rostersync_core::token::{CredentialKey, CredentialStore};
use tracing::info;

use super::{find_provider, load_config, open_store};

/// Run the `disconnect` command: forget a provider's token and sync state.
/// Canonical records and run history are kept.
pub async fn run(config_path: &str, tenant: &str, provider: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    find_provider(&config, tenant, provider)?;
    let store = open_store(&config).await?;

    store
        .discard_token(&CredentialKey {
            tenant_id: tenant.to_string(),
            provider_id: provider.to_string(),
        })
        .await?;
    store.clear_provider(tenant, provider).await?;
    info!(tenant, provider, "Provider disconnected");

    println!("Disconnected {tenant}/{provider}.");
    println!("The next sync performs a full fetch and re-seeds deletion detection.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rostersync_core::models::common::EntityType;
    use rostersync_core::models::cursor::{CursorValue, SyncScope};
    use rostersync_core::store::SqliteStore;
    use rostersync_core::token::AccessToken;

    #[tokio::test]
    async fn disconnect_clears_token_and_cursors() {
        let temp = tempfile::tempdir().unwrap();
        let db_path = temp.path().join("state.db");
        let config_path = temp.path().join("rostersync.toml");
        std::fs::write(
            &config_path,
            format!(
                "[engine]\ndatabase_path = {:?}\n\n[[providers]]\nid = \"edfi\"\ntenant_id = \"t1\"\nkind = \"ed_fi\"\nbase_url = \"https://ods.example.org/api\"\n",
                db_path.to_string_lossy()
            ),
        )
        .unwrap();

        let db = db_path.to_str().unwrap();
        let store = SqliteStore::connect(db).await.unwrap();
        let key = CredentialKey {
            tenant_id: "t1".into(),
            provider_id: "edfi".into(),
        };
        store
            .save_token(
                &key,
                &AccessToken {
                    value: "abc".into(),
                    expires_at: None,
                },
            )
            .await
            .unwrap();
        let scope = SyncScope::new("t1", "edfi", EntityType::User);
        store
            .commit_cursor(&scope, &CursorValue::ChangeVersion(9))
            .await
            .unwrap();

        run(config_path.to_str().unwrap(), "t1", "edfi").await.unwrap();

        assert!(store.load_token(&key).await.unwrap().is_none());
        assert!(store.load_cursor(&scope).await.unwrap().is_none());
    }
}
