//! Settings database operations
//!
//! Key/value accessors over the `settings` table.

use fitscan_common::{Error, Result};
use sqlx::{Pool, Sqlite};

const BACKEND_API_KEY: &str = "backend_api_key";

/// Get backend API key from database
///
/// **Returns:** Some(key) if set, None otherwise
pub async fn get_backend_api_key(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting(db, BACKEND_API_KEY).await
}

/// Set backend API key in database
pub async fn set_backend_api_key(db: &Pool<Sqlite>, key: String) -> Result<()> {
    set_setting(db, BACKEND_API_KEY, key).await
}

/// Generic setting getter
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((value,)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting {} failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter (upsert)
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;

    #[tokio::test]
    async fn test_backend_api_key_not_set() {
        let pool = memory_pool().await.unwrap();
        assert_eq!(get_backend_api_key(&pool).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_backend_api_key_upsert() {
        let pool = memory_pool().await.unwrap();

        set_backend_api_key(&pool, "first".to_string()).await.unwrap();
        set_backend_api_key(&pool, "second".to_string()).await.unwrap();

        assert_eq!(
            get_backend_api_key(&pool).await.unwrap(),
            Some("second".to_string())
        );
    }

    #[tokio::test]
    async fn test_typed_setting_parse_error() {
        let pool = memory_pool().await.unwrap();
        set_setting(&pool, "match_limit", "many").await.unwrap();

        let result: Result<Option<u32>> = get_setting(&pool, "match_limit").await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
