//! Queue initialization.

use db::{DbConfig, init as init_db, repositories::ConfigRepository};
use queue_core::QueueConfig;

use crate::ApiError;

/// Connect to the store and make sure the schema exists.
///
/// Returns the stored queue configuration. This should be called once per
/// process before any other operation.
pub async fn init_queue(db_config: DbConfig) -> Result<QueueConfig, ApiError> {
    tracing::info!("Initializing job queue...");

    init_db(db_config).await?;
    let config = ConfigRepository::get().await?;

    tracing::info!("Job queue initialized");
    Ok(config)
}
