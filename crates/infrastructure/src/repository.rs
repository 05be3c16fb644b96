use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Notification, NotificationRepository, RepositoryError, RepositoryResult, UserId};
use serde_json::Value as JsonValue;
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

#[derive(Debug, FromRow)]
struct NotificationRecord {
    id: Uuid,
    user_id: Uuid,
    event: String,
    payload: sqlx::types::Json<JsonValue>,
    created_at: DateTime<Utc>,
}

impl From<NotificationRecord> for Notification {
    fn from(value: NotificationRecord) -> Self {
        Notification {
            id: value.id,
            user_id: UserId::from(value.user_id),
            event: value.event,
            payload: value.payload.0,
            created_at: value.created_at,
        }
    }
}

/// 基于 PostgreSQL 的推送日志
#[derive(Clone)]
pub struct PgNotificationRepository {
    pool: PgPool,
}

impl PgNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 按时间倒序读取某个用户最近的推送记录
    pub async fn list_for_user(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> RepositoryResult<Vec<Notification>> {
        let records = sqlx::query_as::<_, NotificationRecord>(
            r#"
            SELECT id, user_id, event, payload, created_at
            FROM notifications
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(Uuid::from(user_id))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(records.into_iter().map(Notification::from).collect())
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn create_notification(
        &self,
        user_id: UserId,
        event: &str,
        payload: &JsonValue,
    ) -> RepositoryResult<()> {
        let notification = Notification::new(user_id, event, payload.clone());
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, event, payload, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(notification.id)
        .bind(Uuid::from(notification.user_id))
        .bind(&notification.event)
        .bind(sqlx::types::Json(&notification.payload))
        .bind(notification.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(())
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
