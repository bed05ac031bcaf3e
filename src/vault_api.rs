use axum::{
    extract::Extension,
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::vault::{KeyCipher, MigrationOutcome, RequestContext, VaultAction, VaultService};

/// Single action-dispatched endpoint the provider-settings UI calls.
/// All field requirements beyond `action` depend on the action itself.
#[derive(Debug, Deserialize)]
pub struct ManageKeysRequest {
    pub action: String,
    pub provider_id: Option<Uuid>,
    pub api_key: Option<String>,
    pub password: Option<String>,
}

pub async fn manage_provider_keys(
    Extension(pool): Extension<PgPool>,
    Extension(cipher): Extension<Option<KeyCipher>>,
    auth_user: AuthUser,
    headers: HeaderMap,
    Json(payload): Json<ManageKeysRequest>,
) -> AppResult<Json<Value>> {
    if !auth_user.role.is_admin() {
        return Err(AppError::Forbidden);
    }
    let cipher = cipher.ok_or(AppError::Misconfigured(
        "provider key encryption is not configured",
    ))?;
    let action = VaultAction::parse(&payload.action).ok_or_else(|| {
        AppError::BadRequest(format!(
            "Unknown action '{}'; valid actions are: {}",
            payload.action,
            VaultAction::VALID
        ))
    })?;

    let ctx = request_context(&headers);
    let service = VaultService::new(pool.clone(), cipher);

    match action {
        VaultAction::Encrypt => {
            let api_key = payload
                .api_key
                .filter(|value| !value.is_empty())
                .ok_or_else(|| AppError::BadRequest("api_key is required".into()))?;
            let encrypted = service
                .encrypt_value(auth_user.user_id, &api_key, payload.provider_id, &ctx)
                .await?;
            Ok(Json(json!({
                "success": true,
                "encrypted_key": encrypted.encrypted_key,
                "masked_key": encrypted.masked_key,
            })))
        }
        VaultAction::Decrypt => {
            let provider_id = payload
                .provider_id
                .ok_or_else(|| AppError::BadRequest("provider_id is required".into()))?;
            let password = payload
                .password
                .filter(|value| !value.is_empty())
                .ok_or_else(|| AppError::BadRequest("password is required".into()))?;
            // Rate gate, then step-up, before any cipher work.
            service
                .ensure_decrypt_allowed(auth_user.user_id, &ctx.ip)
                .await?;
            auth::verify_password(&pool, auth_user.user_id, &password).await?;
            let revealed = service.reveal(auth_user.user_id, provider_id, &ctx).await?;
            Ok(Json(json!({
                "success": true,
                "api_key": revealed.api_key,
                "masked_key": revealed.masked_key,
            })))
        }
        VaultAction::GetMasked => {
            let provider_id = payload
                .provider_id
                .ok_or_else(|| AppError::BadRequest("provider_id is required".into()))?;
            let view = service.masked_view(provider_id).await?;
            Ok(Json(json!({
                "success": true,
                "masked_key": view.masked_key,
                "has_key": view.has_key,
                "is_encrypted": view.is_encrypted,
            })))
        }
        VaultAction::ReEncryptLegacy => {
            let provider_id = payload
                .provider_id
                .ok_or_else(|| AppError::BadRequest("provider_id is required".into()))?;
            let outcome = service
                .migrate_legacy(auth_user.user_id, provider_id, &ctx)
                .await?;
            let message = match outcome {
                MigrationOutcome::Migrated => "Provider key encrypted",
                MigrationOutcome::AlreadyEncrypted => "Provider key already encrypted",
            };
            Ok(Json(json!({ "success": true, "message": message })))
        }
    }
}

/// Empty-bodied preflight response; the CORS layer attaches the headers.
pub async fn preflight() -> StatusCode {
    StatusCode::OK
}

/// Permissive CORS applied to every response, matching what the hosted
/// function runtime used to add for the browser client.
pub async fn cors<B>(req: Request<B>, next: Next<B>) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("authorization, x-client-info, apikey, content-type"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    response
}

/// Best-effort request provenance. Forwarding headers are client-settable, so
/// the values are operator visibility, not access control.
fn request_context(headers: &HeaderMap) -> RequestContext {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    RequestContext { ip, user_agent }
}
