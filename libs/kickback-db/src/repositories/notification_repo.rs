use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::notification::NewNotification;

#[derive(Debug, Clone)]
pub struct NotificationRepository {
    pool: PgPool,
}

impl NotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, notification: &NewNotification) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO notifications (user_id, title, message, link)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(notification.user_id)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.link.as_deref())
        .fetch_one(&self.pool)
        .await
        .context("Failed to create notification")
    }
}
