//! Queue configuration repository.

use tracing::info;

use queue_core::{ConfigKey, QueueConfig};

use crate::{get_db, DbError};

/// Repository for the single queue-wide configuration record.
pub struct ConfigRepository;

impl ConfigRepository {
    /// Load the stored configuration, or defaults if nothing was ever set.
    pub async fn get() -> Result<QueueConfig, DbError> {
        let db = get_db()?;

        let config: Option<QueueConfig> = db.select(("config", "global")).await?;

        Ok(config.unwrap_or_default())
    }

    /// Validate and persist one key, returning the updated configuration.
    ///
    /// An invalid value leaves the stored configuration untouched.
    pub async fn set(key: ConfigKey, value: &str) -> Result<QueueConfig, DbError> {
        let mut config = Self::get().await?;
        config.set(key, value)?;
        let config = Self::save(config).await?;
        info!(key = %key, value = %config.get(key), "Updated configuration");
        Ok(config)
    }

    /// Replace the stored configuration.
    pub async fn save(config: QueueConfig) -> Result<QueueConfig, DbError> {
        let db = get_db()?;

        let mut response = db
            .query(r#"UPSERT type::thing("config", "global") CONTENT $config RETURN AFTER"#)
            .bind(("config", config))
            .await?;
        let saved: Vec<QueueConfig> = response.take(0)?;

        saved
            .into_iter()
            .next()
            .ok_or_else(|| DbError::Query("Failed to save configuration".into()))
    }
}
