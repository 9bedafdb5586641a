use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::LocationStore;
use crate::error::{AppError, AppResult};
use crate::models::LocationRecord;

const LOCATION_COLUMNS: &str = "user_id, current_latitude, current_longitude, \
     destination_latitude, destination_longitude, created_at, updated_at";

/// 基于 Postgres 的位置记录存储
#[derive(Clone)]
pub struct PgLocationStore {
    pool: PgPool,
}

impl PgLocationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 建表（幂等）
    pub async fn ensure_schema(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS locations (
                user_id UUID PRIMARY KEY,
                current_latitude DOUBLE PRECISION NOT NULL,
                current_longitude DOUBLE PRECISION NOT NULL,
                destination_latitude DOUBLE PRECISION NOT NULL,
                destination_longitude DOUBLE PRECISION NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("Location table is ready");
        Ok(())
    }

    /// fetch_optional 的 None 转成 NotFound，不和 I/O 错误混淆
    fn found(record: Option<LocationRecord>, user_id: Uuid) -> AppResult<LocationRecord> {
        record.ok_or_else(|| AppError::not_found(format!("location for user {}", user_id)))
    }
}

#[async_trait]
impl LocationStore for PgLocationStore {
    async fn create(&self, record: &LocationRecord) -> AppResult<LocationRecord> {
        let query = format!(
            r#"
            INSERT INTO locations ({LOCATION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id) DO UPDATE SET
                current_latitude = EXCLUDED.current_latitude,
                current_longitude = EXCLUDED.current_longitude,
                destination_latitude = EXCLUDED.destination_latitude,
                destination_longitude = EXCLUDED.destination_longitude,
                updated_at = EXCLUDED.updated_at
            RETURNING {LOCATION_COLUMNS}
            "#
        );

        let saved = sqlx::query_as::<_, LocationRecord>(&query)
            .bind(record.user_id)
            .bind(record.current_latitude)
            .bind(record.current_longitude)
            .bind(record.destination_latitude)
            .bind(record.destination_longitude)
            .bind(record.created_at)
            .bind(record.updated_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(saved)
    }

    async fn get(&self, user_id: Uuid) -> AppResult<LocationRecord> {
        let query = format!("SELECT {LOCATION_COLUMNS} FROM locations WHERE user_id = $1");

        let record = sqlx::query_as::<_, LocationRecord>(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Self::found(record, user_id)
    }

    async fn update(&self, record: &LocationRecord) -> AppResult<LocationRecord> {
        let query = format!(
            r#"
            UPDATE locations
            SET current_latitude = $2, current_longitude = $3,
                destination_latitude = $4, destination_longitude = $5, updated_at = $6
            WHERE user_id = $1
            RETURNING {LOCATION_COLUMNS}
            "#
        );

        let updated = sqlx::query_as::<_, LocationRecord>(&query)
            .bind(record.user_id)
            .bind(record.current_latitude)
            .bind(record.current_longitude)
            .bind(record.destination_latitude)
            .bind(record.destination_longitude)
            .bind(record.updated_at)
            .fetch_optional(&self.pool)
            .await?;

        Self::found(updated, record.user_id)
    }

    async fn update_destination(
        &self,
        user_id: Uuid,
        latitude: f64,
        longitude: f64,
    ) -> AppResult<LocationRecord> {
        let query = format!(
            r#"
            UPDATE locations
            SET destination_latitude = $2, destination_longitude = $3, updated_at = $4
            WHERE user_id = $1
            RETURNING {LOCATION_COLUMNS}
            "#
        );

        let updated = sqlx::query_as::<_, LocationRecord>(&query)
            .bind(user_id)
            .bind(latitude)
            .bind(longitude)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;

        Self::found(updated, user_id)
    }

    async fn update_current_location(
        &self,
        user_id: Uuid,
        latitude: f64,
        longitude: f64,
    ) -> AppResult<LocationRecord> {
        let query = format!(
            r#"
            UPDATE locations
            SET current_latitude = $2, current_longitude = $3, updated_at = $4
            WHERE user_id = $1
            RETURNING {LOCATION_COLUMNS}
            "#
        );

        let updated = sqlx::query_as::<_, LocationRecord>(&query)
            .bind(user_id)
            .bind(latitude)
            .bind(longitude)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;

        Self::found(updated, user_id)
    }

    async fn delete(&self, user_id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM locations WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("location for user {}", user_id)));
        }
        Ok(())
    }

    async fn list_page(&self, after: Option<Uuid>, limit: i64) -> AppResult<Vec<LocationRecord>> {
        let query = format!(
            r#"
            SELECT {LOCATION_COLUMNS}
            FROM locations
            WHERE ($1::UUID IS NULL OR user_id > $1)
            ORDER BY user_id
            LIMIT $2
            "#
        );

        let records = sqlx::query_as::<_, LocationRecord>(&query)
            .bind(after)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }
}
