use hc_db::StorageError;
use hc_sentry::SentryError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Db(#[from] StorageError),
    #[error("Sentry error: {0}")]
    Sentry(#[from] SentryError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
