use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Inserts one notification row per superadmin, skipping the actor. Delivery
/// is best-effort: the decrypt already succeeded, and failures here are
/// logged and swallowed.
pub async fn notify_superadmins(
    pool: &PgPool,
    actor_id: i32,
    title: &str,
    message: &str,
    link: &str,
) {
    let recipients = match sqlx::query(
        "SELECT id FROM users WHERE role = 'superadmin' AND id <> $1",
    )
    .bind(actor_id)
    .fetch_all(pool)
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(?e, "failed to load superadmins for notification fan-out");
            return;
        }
    };

    for row in recipients {
        let recipient: i32 = row.get("id");
        let result = sqlx::query(
            "INSERT INTO notifications (id, user_id, title, message, link) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(recipient)
        .bind(title)
        .bind(message)
        .bind(link)
        .execute(pool)
        .await;
        if let Err(e) = result {
            tracing::warn!(?e, recipient, "failed to deliver admin notification");
        }
    }
}
