use sqlx::PgPool;

use crate::config;

/// Rebuilds the pre-masked provider summary the UI lists from. Secrets never
/// leave the providers table; only presence flags are copied out.
pub async fn refresh_provider_catalog(pool: &PgPool) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "INSERT INTO provider_catalog (provider_id, name, has_key, is_encrypted, refreshed_at) \
         SELECT id, name, api_key IS NOT NULL, api_key_encrypted_at IS NOT NULL, NOW() \
         FROM providers \
         ON CONFLICT (provider_id) DO UPDATE SET \
           name = EXCLUDED.name, \
           has_key = EXCLUDED.has_key, \
           is_encrypted = EXCLUDED.is_encrypted, \
           refreshed_at = EXCLUDED.refreshed_at",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Backfills a profile row for any user missing one. Display names default to
/// the local part of the email; users can change them later.
pub async fn reconcile_profiles(pool: &PgPool) -> sqlx::Result<u64> {
    let result = sqlx::query(
        "INSERT INTO profiles (user_id, display_name, reconciled_at) \
         SELECT id, split_part(email, '@', 1), NOW() FROM users u \
         WHERE NOT EXISTS (SELECT 1 FROM profiles p WHERE p.user_id = u.id)",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Interval worker replacing the externally scheduled refresh functions.
/// A failed tick logs and waits for the next one; it never exits.
pub fn start_maintenance_worker(pool: PgPool) {
    let interval = *config::CATALOG_REFRESH_INTERVAL_SECS;
    tokio::spawn(async move {
        loop {
            match refresh_provider_catalog(&pool).await {
                Ok(rows) => tracing::debug!(rows, "provider catalog refreshed"),
                Err(e) => tracing::warn!(?e, "provider catalog refresh failed"),
            }
            match reconcile_profiles(&pool).await {
                Ok(0) => {}
                Ok(rows) => tracing::info!(rows, "profiles reconciled"),
                Err(e) => tracing::warn!(?e, "profile reconciliation failed"),
            }
            tokio::time::sleep(std::time::Duration::from_secs(interval)).await;
        }
    });
}
