use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::vault::mask;
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use tracing::error;
use uuid::Uuid;

#[derive(Serialize)]
pub struct ApiKeyInfo {
    pub id: Uuid,
    pub name: String,
    pub masked_key: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Deserialize)]
pub struct CreateApiKey {
    pub name: String,
}

#[derive(Serialize)]
pub struct CreatedApiKey {
    pub id: Uuid,
    pub name: String,
    /// Returned exactly once; only the hash is stored.
    pub api_key: String,
    pub masked_key: String,
}

/// Generates a platform key in the format `vlx_<32 hex chars>`.
pub fn generate_key() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    format!("vlx_{}", hex::encode(bytes))
}

/// SHA-256 digest used for storage and lookup; the clear key never persists.
pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn key_suffix(key: &str) -> String {
    // Generated keys are ASCII, so a byte slice is safe here.
    key[key.len() - 4..].to_string()
}

pub async fn create_key(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Json(payload): Json<CreateApiKey>,
) -> AppResult<Json<CreatedApiKey>> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("Name required".into()));
    }
    let key = generate_key();
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO api_keys (id, user_id, name, key_hash, key_suffix) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(user_id)
    .bind(payload.name.trim())
    .bind(hash_key(&key))
    .bind(key_suffix(&key))
    .execute(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error inserting api key");
        AppError::Db(e)
    })?;
    Ok(Json(CreatedApiKey {
        id,
        name: payload.name.trim().to_string(),
        masked_key: mask(&key),
        api_key: key,
    }))
}

pub async fn list_keys(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<Vec<ApiKeyInfo>>> {
    let rows = sqlx::query(
        "SELECT id, name, key_suffix, created_at FROM api_keys \
         WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error listing api keys");
        AppError::Db(e)
    })?;
    let keys = rows
        .into_iter()
        .map(|r| {
            let suffix: String = r.get("key_suffix");
            ApiKeyInfo {
                id: r.get("id"),
                name: r.get("name"),
                masked_key: format!("••••••••{suffix}"),
                created_at: r.get("created_at"),
            }
        })
        .collect();
    Ok(Json(keys))
}

pub async fn revoke_key(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let res = sqlx::query("DELETE FROM api_keys WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(&pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error revoking api key");
            AppError::Db(e)
        })?;
    if res.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_have_expected_shape() {
        let key = generate_key();
        assert!(key.starts_with("vlx_"));
        assert_eq!(key.len(), 4 + 32);
        assert!(key[4..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(key, generate_key());
    }

    #[test]
    fn hash_is_stable_and_hides_the_key() {
        let key = "vlx_0123456789abcdef0123456789abcdef";
        let digest = hash_key(key);
        assert_eq!(digest, hash_key(key));
        assert_eq!(digest.len(), 64);
        assert!(!digest.contains("vlx_"));
    }

    #[test]
    fn suffix_is_last_four_chars() {
        assert_eq!(key_suffix("vlx_00000000000000000000000000001234"), "1234");
    }
}
