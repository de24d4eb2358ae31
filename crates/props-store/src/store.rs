use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use common::extra_props::{ExtraPropertiesError, ExtraPropertiesStore};
use sqlx::Row;

use crate::database::{Database, DatabaseError};

/// [`ExtraPropertiesStore`] persisted in SQLite, so digests and original
/// filenames survive a restart.
#[derive(Debug, Clone)]
pub struct SqliteExtraProperties {
    db: Database,
}

impl SqliteExtraProperties {
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        Ok(Self {
            db: Database::new(path).await?,
        })
    }

    pub async fn in_memory() -> Result<Self, DatabaseError> {
        Ok(Self {
            db: Database::in_memory().await?,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

fn backend(e: sqlx::Error) -> ExtraPropertiesError {
    ExtraPropertiesError::Backend(e.to_string())
}

#[async_trait]
impl ExtraPropertiesStore for SqliteExtraProperties {
    async fn get(&self, id: &str, name: &str) -> Result<Option<String>, ExtraPropertiesError> {
        let row = sqlx::query(
            "SELECT value FROM extra_properties WHERE resource_id = ? AND name = ?",
        )
        .bind(id)
        .bind(name)
        .fetch_optional(&*self.db)
        .await
        .map_err(backend)?;

        Ok(row.map(|r| r.get("value")))
    }

    async fn get_all(&self, id: &str) -> Result<BTreeMap<String, String>, ExtraPropertiesError> {
        let rows = sqlx::query("SELECT name, value FROM extra_properties WHERE resource_id = ?")
            .bind(id)
            .fetch_all(&*self.db)
            .await
            .map_err(backend)?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("name"), r.get("value")))
            .collect())
    }

    async fn store(&self, id: &str, name: &str, value: &str) -> Result<(), ExtraPropertiesError> {
        sqlx::query(
            r#"
            INSERT INTO extra_properties (resource_id, name, value, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (resource_id, name)
            DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(value)
        .bind(Utc::now().timestamp())
        .execute(&*self.db)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn remove(&self, id: &str, name: &str) -> Result<bool, ExtraPropertiesError> {
        let result =
            sqlx::query("DELETE FROM extra_properties WHERE resource_id = ? AND name = ?")
                .bind(id)
                .bind(name)
                .execute(&*self.db)
                .await
                .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_all(&self, id: &str) -> Result<(), ExtraPropertiesError> {
        sqlx::query("DELETE FROM extra_properties WHERE resource_id = ?")
            .bind(id)
            .execute(&*self.db)
            .await
            .map_err(backend)?;

        Ok(())
    }

    async fn ping(&self) -> Result<(), ExtraPropertiesError> {
        sqlx::query("SELECT 1")
            .execute(&*self.db)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::extra_props::{CONTENT_DIGEST, MIME_TYPE, ORIGINAL_NAME};

    #[tokio::test]
    async fn test_store_and_get() {
        let store = SqliteExtraProperties::in_memory().await.unwrap();
        assert!(store.get("/a", ORIGINAL_NAME).await.unwrap().is_none());

        store.store("/a", ORIGINAL_NAME, "report.pdf").await.unwrap();
        assert_eq!(
            store.get("/a", ORIGINAL_NAME).await.unwrap().as_deref(),
            Some("report.pdf")
        );
    }

    #[tokio::test]
    async fn test_store_overwrites() {
        let store = SqliteExtraProperties::in_memory().await.unwrap();
        store.store("/a", CONTENT_DIGEST, "urn:sha1:01").await.unwrap();
        store.store("/a", CONTENT_DIGEST, "urn:sha1:02").await.unwrap();

        assert_eq!(
            store.get("/a", CONTENT_DIGEST).await.unwrap().as_deref(),
            Some("urn:sha1:02")
        );
        assert_eq!(store.database().property_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_all_and_remove_all() {
        let store = SqliteExtraProperties::in_memory().await.unwrap();
        store.store("/a", MIME_TYPE, "text/plain").await.unwrap();
        store.store("/a", ORIGINAL_NAME, "a.txt").await.unwrap();
        store.store("/b", MIME_TYPE, "image/png").await.unwrap();

        let all = store.get_all("/a").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.get(MIME_TYPE).map(String::as_str), Some("text/plain"));

        store.remove_all("/a").await.unwrap();
        assert!(store.get_all("/a").await.unwrap().is_empty());
        assert_eq!(store.get_all("/b").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_reports_existence() {
        let store = SqliteExtraProperties::in_memory().await.unwrap();
        store.store("/a", MIME_TYPE, "text/plain").await.unwrap();
        assert!(store.remove("/a", MIME_TYPE).await.unwrap());
        assert!(!store.remove("/a", MIME_TYPE).await.unwrap());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("props.sqlite");

        {
            let store = SqliteExtraProperties::new(&path).await.unwrap();
            store.store("/f", CONTENT_DIGEST, "urn:sha1:ab").await.unwrap();
            store.database().close().await;
        }

        let store = SqliteExtraProperties::new(&path).await.unwrap();
        assert_eq!(
            store.get("/f", CONTENT_DIGEST).await.unwrap().as_deref(),
            Some("urn:sha1:ab")
        );
        store.ping().await.unwrap();
    }
}
