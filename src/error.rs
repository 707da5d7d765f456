use std::time::Duration;

/// Platform API failures (fetch, delete, account lookup).
#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("unauthorized (check X_BEARER_TOKEN scopes)")] Unauthorized,
    #[error("rate limited (retry after {retry_after:?})")] RateLimited { retry_after: Option<Duration> },
    #[error("unexpected status {status}: {body}")] Status { status: u16, body: String },
    #[error("delete of {0} not confirmed by platform")] NotDeleted(String),
    #[error("transport: {0}")] Transport(#[from] reqwest::Error),
    #[error("malformed response: {0}")] Malformed(String),
}

/// Persistence failures (ledger or run state).
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("duplicate record for post {0}")] Duplicate(String),
    #[error("io: {0}")] Io(#[from] std::io::Error),
    #[error("serialization: {0}")] Serde(#[from] serde_json::Error),
    #[error("database: {0}")] Database(#[from] sqlx::Error),
    #[error("migration: {0}")] Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Analysis provider failures. Never escapes the classifier.
#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("transport: {0}")] Transport(#[from] reqwest::Error),
    #[error("provider returned status {0}")] Status(u16),
    #[error("empty completion")] Empty,
    #[error("malformed verdict: {0}")] Malformed(String),
}

/// Object storage failures.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("upload of {key} failed: {message}")] Upload { key: String, message: String },
}

/// Media download failures (archiver and classifier image fetches).
#[derive(thiserror::Error, Debug)]
pub enum DownloadError {
    #[error("http status {0}")] Status(u16),
    #[error("transport: {0}")] Transport(#[from] reqwest::Error),
    #[error("decode: {0}")] Decode(#[from] image::ImageError),
}

/// Startup configuration problems; fatal before any run begins.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")] Missing(&'static str),
    #[error("invalid value for {name}: {value}")] Invalid { name: &'static str, value: String },
}

/// Errors that end a pipeline run early. State is saved before these surface.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("store: {0}")] Store(#[from] StoreError),
    #[error("platform: {0}")] Source(#[from] SourceError),
}
