//! Configuration operations.

use db::repositories::ConfigRepository;
use queue_core::{ConfigKey, QueueConfig};

use crate::ApiError;

/// The stored configuration, or defaults.
pub async fn config_show() -> Result<QueueConfig, ApiError> {
    Ok(ConfigRepository::get().await?)
}

/// Current value of one key.
pub async fn config_get(key: &str) -> Result<(ConfigKey, String), ApiError> {
    let key: ConfigKey = key.parse()?;
    let config = ConfigRepository::get().await?;
    Ok((key, config.get(key)))
}

/// Validate and persist one key. Jobs already enqueued keep their settings.
pub async fn config_set(key: &str, value: &str) -> Result<QueueConfig, ApiError> {
    let key: ConfigKey = key.parse()?;
    Ok(ConfigRepository::set(key, value).await?)
}
