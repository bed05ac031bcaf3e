use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

/// Action kinds recorded in the vault audit trail.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ProviderKeyDecrypted,
    ProviderKeyEncrypted,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::ProviderKeyDecrypted => "provider_key_decrypted",
            AuditAction::ProviderKeyEncrypted => "provider_key_encrypted",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "provider_key_decrypted" => Some(Self::ProviderKeyDecrypted),
            "provider_key_encrypted" => Some(Self::ProviderKeyEncrypted),
            _ => None,
        }
    }
}

/// Immutable audit entry; written once per successful decrypt or
/// encrypt/migrate action, never updated.
#[derive(Clone, Debug, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor_id: i32,
    pub action: AuditAction,
    pub provider_id: Option<Uuid>,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

pub async fn record(
    pool: &PgPool,
    actor_id: i32,
    action: AuditAction,
    provider_id: Option<Uuid>,
    details: Value,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO audit_log (id, actor_id, action, provider_id, details, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(Uuid::new_v4())
    .bind(actor_id)
    .bind(action.as_str())
    .bind(provider_id)
    .bind(details)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// Audit writes never fail the operation they describe; a lost row is logged
/// and the primary result still returns.
pub async fn record_best_effort(
    pool: &PgPool,
    actor_id: i32,
    action: AuditAction,
    provider_id: Option<Uuid>,
    details: Value,
) {
    if let Err(e) = record(pool, actor_id, action, provider_id, details).await {
        tracing::error!(?e, action = action.as_str(), actor_id, "audit write failed");
    }
}

/// Number of decrypts the actor has performed inside the trailing window.
/// The window slides continuously; this count is the whole of the rate
/// limiter's shared state, so it is eventually consistent under concurrency.
pub async fn decrypt_count_since(
    pool: &PgPool,
    actor_id: i32,
    window: Duration,
) -> sqlx::Result<i64> {
    let since = Utc::now() - window;
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM audit_log \
         WHERE actor_id = $1 AND action = $2 AND created_at >= $3",
    )
    .bind(actor_id)
    .bind(AuditAction::ProviderKeyDecrypted.as_str())
    .bind(since)
    .fetch_one(pool)
    .await
}
