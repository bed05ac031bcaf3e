use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::{PgPool, Row};
use tracing::error;
use uuid::Uuid;

use crate::audit::{self, AuditAction};
use crate::config;
use crate::error::{AppError, AppResult};
use crate::notify;

use super::cipher::KeyCipher;
use super::mask::mask;
use super::models::{
    EncryptedValue, MaskedView, ProviderCredential, RequestContext, RevealedKey, StoredSecret,
};

/// Entry point for credential-vault operations. Constructed per request from
/// the pooled connection and the startup-loaded cipher.
pub struct VaultService {
    pool: PgPool,
    cipher: KeyCipher,
}

/// Outcome of a legacy-plaintext migration request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    Migrated,
    AlreadyEncrypted,
}

impl VaultService {
    pub fn new(pool: PgPool, cipher: KeyCipher) -> Self {
        Self { pool, cipher }
    }

    async fn fetch_provider(&self, provider_id: Uuid) -> AppResult<ProviderCredential> {
        let row = sqlx::query(
            "SELECT id, name, api_key, api_key_encrypted_at FROM providers WHERE id = $1",
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error fetching provider");
            AppError::Db(e)
        })?;
        let row = row.ok_or(AppError::NotFound)?;
        Ok(ProviderCredential {
            id: row.get("id"),
            name: row.get("name"),
            secret: StoredSecret::from_row(
                row.try_get("api_key").ok(),
                row.try_get("api_key_encrypted_at").ok(),
            ),
        })
    }

    /// Masked projection of a provider's stored secret. An encrypted value
    /// that fails to decrypt is rendered from the raw blob and reported as
    /// not encrypted, matching how pre-migration records display.
    pub async fn masked_view(&self, provider_id: Uuid) -> AppResult<MaskedView> {
        let provider = self.fetch_provider(provider_id).await?;
        let view = match provider.secret {
            None => MaskedView {
                has_key: false,
                is_encrypted: false,
                masked_key: None,
            },
            Some(StoredSecret::Plaintext(value)) => MaskedView {
                has_key: true,
                is_encrypted: false,
                masked_key: Some(mask(&value)),
            },
            Some(StoredSecret::Encrypted { blob, .. }) => match self.cipher.decrypt(&blob) {
                Ok(plaintext) => MaskedView {
                    has_key: true,
                    is_encrypted: true,
                    masked_key: Some(mask(&plaintext)),
                },
                Err(e) => {
                    error!(%e, %provider_id, "stored blob did not decrypt; masking raw value");
                    MaskedView {
                        has_key: true,
                        is_encrypted: false,
                        masked_key: Some(mask(&blob)),
                    }
                }
            },
        };
        Ok(view)
    }

    /// Encrypts a caller-supplied key and returns the blob without persisting
    /// it; the owning provider record is updated by provider management.
    pub async fn encrypt_value(
        &self,
        actor_id: i32,
        plaintext: &str,
        provider_id: Option<Uuid>,
        ctx: &RequestContext,
    ) -> AppResult<EncryptedValue> {
        let encrypted_key = self
            .cipher
            .encrypt(plaintext)
            .map_err(|_| AppError::Decryption)?;
        audit::record_best_effort(
            &self.pool,
            actor_id,
            AuditAction::ProviderKeyEncrypted,
            provider_id,
            json!({ "ip": ctx.ip, "user_agent": ctx.user_agent }),
        )
        .await;
        Ok(EncryptedValue {
            encrypted_key,
            masked_key: mask(plaintext),
        })
    }

    /// Migrates a legacy plaintext secret to the encrypted form. Idempotent:
    /// an already-encrypted record succeeds without touching the row or the
    /// audit trail.
    pub async fn migrate_legacy(
        &self,
        actor_id: i32,
        provider_id: Uuid,
        ctx: &RequestContext,
    ) -> AppResult<MigrationOutcome> {
        let provider = self.fetch_provider(provider_id).await?;
        let plaintext = match provider.secret {
            Some(StoredSecret::Encrypted { .. }) => return Ok(MigrationOutcome::AlreadyEncrypted),
            Some(StoredSecret::Plaintext(value)) => value,
            None => return Err(AppError::BadRequest("Provider has no key to encrypt".into())),
        };

        let blob = self
            .cipher
            .encrypt(&plaintext)
            .map_err(|_| AppError::Decryption)?;
        sqlx::query("UPDATE providers SET api_key = $1, api_key_encrypted_at = $2 WHERE id = $3")
            .bind(&blob)
            .bind(Utc::now())
            .bind(provider_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!(?e, "DB error persisting migrated key");
                AppError::Db(e)
            })?;

        audit::record_best_effort(
            &self.pool,
            actor_id,
            AuditAction::ProviderKeyEncrypted,
            Some(provider_id),
            json!({
                "provider_name": provider.name,
                "migration_type": "legacy_to_encrypted",
                "ip": ctx.ip,
                "user_agent": ctx.user_agent,
            }),
        )
        .await;
        Ok(MigrationOutcome::Migrated)
    }

    /// Rate gate for decrypts, evaluated before the step-up password check.
    /// Derived from the audit trail rather than a dedicated counter.
    pub async fn ensure_decrypt_allowed(&self, actor_id: i32, ip: &str) -> AppResult<()> {
        let window = Duration::minutes(*config::DECRYPT_RATE_WINDOW_MINUTES);
        let count = audit::decrypt_count_since(&self.pool, actor_id, window)
            .await
            .map_err(|e| {
                error!(?e, "DB error counting recent decrypts");
                AppError::Db(e)
            })?;
        let limit = *config::DECRYPT_RATE_LIMIT;
        if count >= limit {
            return Err(AppError::RateLimited(format!(
                "Decrypt limit of {} per {} minutes reached (requests from {})",
                limit,
                *config::DECRYPT_RATE_WINDOW_MINUTES,
                ip
            )));
        }
        Ok(())
    }

    /// Decrypts and returns a provider's key. The caller must already have
    /// passed the rate gate and step-up re-authentication. Writes the audit
    /// entry and fans out the superadmin notice; neither can fail the reveal.
    pub async fn reveal(
        &self,
        actor_id: i32,
        provider_id: Uuid,
        ctx: &RequestContext,
    ) -> AppResult<RevealedKey> {
        let provider = self.fetch_provider(provider_id).await?;
        let plaintext = match provider.secret {
            None => return Err(AppError::NotFound),
            Some(StoredSecret::Plaintext(value)) => value,
            Some(StoredSecret::Encrypted { blob, .. }) => {
                self.cipher.decrypt(&blob).map_err(|e| {
                    error!(%e, %provider_id, "provider key failed to decrypt");
                    AppError::Decryption
                })?
            }
        };

        audit::record_best_effort(
            &self.pool,
            actor_id,
            AuditAction::ProviderKeyDecrypted,
            Some(provider_id),
            json!({
                "provider_name": provider.name,
                "ip": ctx.ip,
                "user_agent": ctx.user_agent,
            }),
        )
        .await;

        let actor_email = self.actor_email(actor_id).await;
        notify::notify_superadmins(
            &self.pool,
            actor_id,
            "Provider API key decrypted",
            &format!(
                "{} revealed the API key for provider {}",
                actor_email, provider.name
            ),
            &format!("/admin/providers/{}", provider_id),
        )
        .await;

        Ok(RevealedKey {
            masked_key: mask(&plaintext),
            api_key: plaintext,
            provider_name: provider.name,
        })
    }

    async fn actor_email(&self, actor_id: i32) -> String {
        sqlx::query_scalar::<_, String>("SELECT email FROM users WHERE id = $1")
            .bind(actor_id)
            .fetch_optional(&self.pool)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| format!("user {}", actor_id))
    }
}
