use std::str::FromStr;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;

use crate::dto::{StoredFileDto, SubscriptionDto};

pub struct DbService {
    pool: SqlitePool,
}

impl DbService {
    pub async fn new_sqlite(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        Ok(Self { pool })
    }

    /// Single-connection in-memory database; every connection to `:memory:`
    /// would otherwise see its own empty schema.
    #[cfg(test)]
    pub async fn new_in_memory() -> Result<Self, sqlx::Error> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.migrate().await?;

        Ok(db)
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./db/migrations").run(&self.pool).await?;

        Ok(())
    }

    pub async fn get_subscription_by_chat_id(
        &self,
        chat_id: i64,
    ) -> Result<Option<SubscriptionDto>, sqlx::Error> {
        sqlx::query_as::<_, SubscriptionDto>(
            "SELECT chat_id, unique_id, subscribed_until, verified FROM users WHERE chat_id = ?",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn get_subscription_by_unique_id(
        &self,
        unique_id: &str,
    ) -> Result<Option<SubscriptionDto>, sqlx::Error> {
        sqlx::query_as::<_, SubscriptionDto>(
            "SELECT chat_id, unique_id, subscribed_until, verified FROM users WHERE unique_id = ?",
        )
        .bind(unique_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Creates the record for `chat_id` or resets an existing one to the
    /// unverified state under a new token.
    pub async fn upsert_subscription_token(
        &self,
        chat_id: i64,
        unique_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO users (chat_id, unique_id, subscribed_until, verified)
            VALUES (?, ?, NULL, 0)
            ON CONFLICT(chat_id) DO UPDATE SET
                unique_id = excluded.unique_id,
                subscribed_until = NULL,
                verified = 0
            "#,
        )
        .bind(chat_id)
        .bind(unique_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Marks the record owning `unique_id` as verified until `until` (unix
    /// seconds). Returns the owning chat id, or `None` when no record matched.
    pub async fn verify_subscription(
        &self,
        unique_id: &str,
        until: i64,
    ) -> Result<Option<i64>, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE users SET verified = 1, subscribed_until = ? WHERE unique_id = ? RETURNING chat_id",
        )
        .bind(until)
        .bind(unique_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(chat_id,)| chat_id))
    }

    pub async fn get_file(&self, unique_id: &str) -> Result<Option<StoredFileDto>, sqlx::Error> {
        sqlx::query_as::<_, StoredFileDto>(
            "SELECT file_id, file_type FROM file_storage WHERE unique_id = ?",
        )
        .bind(unique_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn file_exists(&self, unique_id: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM file_storage WHERE unique_id = ?")
            .bind(unique_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    pub async fn insert_file(
        &self,
        unique_id: &str,
        file_id: &str,
        file_type: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO file_storage (unique_id, file_id, file_type) VALUES (?, ?, ?)")
            .bind(unique_id)
            .bind(file_id)
            .bind(file_type)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[cfg(test)]
    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[cfg(test)]
    pub async fn count_files(&self) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM file_storage")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
