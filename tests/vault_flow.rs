use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::{Extension, Router};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

use visuluxe_vault::audit::{self, AuditAction};
use visuluxe_vault::auth;
use visuluxe_vault::routes::api_routes;
use visuluxe_vault::vault::{KeyCipher, MigrationOutcome, RequestContext, VaultService};

fn cipher() -> KeyCipher {
    KeyCipher::from_bytes(&[7u8; 32]).unwrap()
}

async fn create_user(pool: &PgPool, email: &str, role: &str, password: &str) -> i32 {
    let hash = auth::hash_password(password).unwrap();
    sqlx::query_scalar(
        "INSERT INTO users (email, password_hash, role) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(email)
    .bind(hash)
    .bind(role)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn create_provider(pool: &PgPool, name: &str, api_key: Option<&str>) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO providers (id, name, api_key) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(name)
        .bind(api_key)
        .execute(pool)
        .await
        .unwrap();
    id
}

async fn encrypted_audit_count(pool: &PgPool, provider_id: Uuid) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM audit_log WHERE provider_id = $1 AND action = 'provider_key_encrypted'",
    )
    .bind(provider_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn legacy_key_masks_migrates_and_stays_decryptable(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let actor = create_user(&pool, "ops@visuluxe.test", "admin", "hunter2hunter2").await;
    let provider = create_provider(&pool, "fluxgen", Some("sk-legacy-123")).await;
    let service = VaultService::new(pool.clone(), cipher());
    let ctx = RequestContext::default();

    let before = service.masked_view(provider).await.unwrap();
    assert!(before.has_key);
    assert!(!before.is_encrypted);
    assert_eq!(before.masked_key.as_deref(), Some("••••••••-123"));

    let outcome = service.migrate_legacy(actor, provider, &ctx).await.unwrap();
    assert_eq!(outcome, MigrationOutcome::Migrated);

    let after = service.masked_view(provider).await.unwrap();
    assert!(after.has_key);
    assert!(after.is_encrypted);
    assert_eq!(after.masked_key.as_deref(), Some("••••••••-123"));

    // Second migration is a no-op success and writes no further audit entry.
    let again = service.migrate_legacy(actor, provider, &ctx).await.unwrap();
    assert_eq!(again, MigrationOutcome::AlreadyEncrypted);
    assert_eq!(encrypted_audit_count(&pool, provider).await, 1);

    let revealed = service.reveal(actor, provider, &ctx).await.unwrap();
    assert_eq!(revealed.api_key, "sk-legacy-123");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn corrupt_blob_falls_back_to_legacy_style_masking(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let provider = create_provider(&pool, "pixelforge", Some("not-a-valid-blob")).await;
    sqlx::query("UPDATE providers SET api_key_encrypted_at = NOW() WHERE id = $1")
        .bind(provider)
        .execute(&pool)
        .await
        .unwrap();
    let service = VaultService::new(pool.clone(), cipher());

    let view = service.masked_view(provider).await.unwrap();
    assert!(view.has_key);
    assert!(!view.is_encrypted);
    assert_eq!(view.masked_key.as_deref(), Some("••••••••blob"));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn masked_view_reports_missing_key_and_missing_provider(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let service = VaultService::new(pool.clone(), cipher());

    let provider = create_provider(&pool, "keyless", None).await;
    let view = service.masked_view(provider).await.unwrap();
    assert!(!view.has_key);
    assert_eq!(view.masked_key, None);

    let missing = service.masked_view(Uuid::new_v4()).await;
    assert!(matches!(
        missing,
        Err(visuluxe_vault::error::AppError::NotFound)
    ));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn tenth_decrypt_in_window_blocks_the_eleventh(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let actor = create_user(&pool, "limit@visuluxe.test", "admin", "hunter2hunter2").await;
    let provider = create_provider(&pool, "fluxgen", Some("sk-rate-limit")).await;
    let service = VaultService::new(pool.clone(), cipher());

    for _ in 0..9 {
        audit::record(
            &pool,
            actor,
            AuditAction::ProviderKeyDecrypted,
            Some(provider),
            json!({}),
        )
        .await
        .unwrap();
    }
    service
        .ensure_decrypt_allowed(actor, "203.0.113.9")
        .await
        .expect("nine decrypts in the window should still be allowed");

    audit::record(
        &pool,
        actor,
        AuditAction::ProviderKeyDecrypted,
        Some(provider),
        json!({}),
    )
    .await
    .unwrap();
    let denied = service.ensure_decrypt_allowed(actor, "203.0.113.9").await;
    match denied {
        Err(visuluxe_vault::error::AppError::RateLimited(message)) => {
            assert!(message.contains("10"));
            assert!(message.contains("203.0.113.9"));
        }
        other => panic!("expected rate limit, got {other:?}"),
    }
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn entries_outside_the_window_do_not_count(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let actor = create_user(&pool, "stale@visuluxe.test", "admin", "hunter2hunter2").await;
    for _ in 0..10 {
        sqlx::query(
            "INSERT INTO audit_log (id, actor_id, action, details, created_at) \
             VALUES ($1, $2, 'provider_key_decrypted', '{}', $3)",
        )
        .bind(Uuid::new_v4())
        .bind(actor)
        .bind(Utc::now() - Duration::minutes(61))
        .execute(&pool)
        .await
        .unwrap();
    }
    let count = audit::decrypt_count_since(&pool, actor, Duration::minutes(60))
        .await
        .unwrap();
    assert_eq!(count, 0);
    VaultService::new(pool.clone(), cipher())
        .ensure_decrypt_allowed(actor, "unknown")
        .await
        .expect("stale entries must not block");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn wrong_step_up_password_stops_before_cipher_and_audit(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    std::env::set_var("JWT_SECRET", "secret");
    let actor = create_user(&pool, "stepup@visuluxe.test", "admin", "correct-password").await;
    let provider = create_provider(&pool, "fluxgen", Some("sk-step-up-9999")).await;

    let app = Router::new()
        .merge(api_routes())
        .layer(Extension(pool.clone()))
        .layer(Extension(Some(cipher())));
    let claims = json!({"sub": actor, "role": "admin", "exp": 9999999999u64});
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"secret"),
    )
    .unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/manage-provider-keys")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(
            json!({
                "action": "decrypt",
                "provider_id": provider,
                "password": "wrong-password"
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let audits: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(audits, 0, "failed step-up must leave no audit trace");
    let notices: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(notices, 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn decrypt_notifies_every_superadmin_except_the_actor(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let actor = create_user(&pool, "root1@visuluxe.test", "superadmin", "hunter2hunter2").await;
    let other_root = create_user(&pool, "root2@visuluxe.test", "superadmin", "hunter2hunter2").await;
    let plain_admin = create_user(&pool, "admin@visuluxe.test", "admin", "hunter2hunter2").await;

    let service = VaultService::new(pool.clone(), cipher());
    let blob = cipher().encrypt("sk-fanout-4242").unwrap();
    let provider = create_provider(&pool, "fluxgen", Some(blob.as_str())).await;
    sqlx::query("UPDATE providers SET api_key_encrypted_at = NOW() WHERE id = $1")
        .bind(provider)
        .execute(&pool)
        .await
        .unwrap();

    let revealed = service
        .reveal(actor, provider, &RequestContext::default())
        .await
        .unwrap();
    assert_eq!(revealed.api_key, "sk-fanout-4242");
    assert_eq!(revealed.masked_key, "••••••••4242");

    let count_for = |user: i32| {
        let pool = pool.clone();
        async move {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM notifications WHERE user_id = $1")
                .bind(user)
                .fetch_one(&pool)
                .await
                .unwrap()
        }
    };
    assert_eq!(count_for(actor).await, 0, "actor must not self-notify");
    assert_eq!(count_for(other_root).await, 1);
    assert_eq!(count_for(plain_admin).await, 0, "admins below the top role are not notified");

    let audits: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM audit_log WHERE action = 'provider_key_decrypted' AND provider_id = $1",
    )
    .bind(provider)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(audits, 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn encrypt_action_returns_blob_without_persisting(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let actor = create_user(&pool, "enc@visuluxe.test", "admin", "hunter2hunter2").await;
    let service = VaultService::new(pool.clone(), cipher());

    let encrypted = service
        .encrypt_value(actor, "sk-fresh-key-7777", None, &RequestContext::default())
        .await
        .unwrap();
    assert_eq!(encrypted.masked_key, "••••••••7777");
    assert_eq!(cipher().decrypt(&encrypted.encrypted_key).unwrap(), "sk-fresh-key-7777");

    let providers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM providers")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(providers, 0, "encrypt must not write provider rows");
    let audits: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM audit_log WHERE action = 'provider_key_encrypted'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(audits, 1);
}
