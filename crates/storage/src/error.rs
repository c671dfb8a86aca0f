#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("postgres: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("postgres migration: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("inconsistent state: {0}")]
    Inconsistent(String),
}

impl From<StorageError> for lgw_domain::Error {
    fn from(err: StorageError) -> Self {
        lgw_domain::Error::Storage(err.to_string())
    }
}
