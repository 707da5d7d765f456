use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::error::ConfigError;

pub const DEFAULT_X_API_BASE: &str = "https://api.x.com";
pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_CUTOFF_DATE: &str = "2019-01-01";
pub const DEFAULT_MIN_AGE_DAYS: i64 = 3;
pub const DEFAULT_DELETE_DELAY_SECS: u64 = 2;
pub const DEFAULT_BUCKET: &str = "sieve-archive";

/// Deployment environment. Development runs use a separate namespace so they
/// never touch production history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnv {
    Production,
    Development,
}

impl RunEnv {
    pub fn suffix(&self) -> &'static str {
        match self {
            RunEnv::Production => "",
            RunEnv::Development => "-dev",
        }
    }
}

/// Object storage settings. Present only when credentials are configured.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub endpoint: String,
    pub public_base_url: Option<String>,
}

/// Process-wide configuration, built once at startup and passed to each
/// component constructor.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub x_bearer_token: String,
    pub x_api_base: String,
    pub openai_api_key: String,
    pub openai_api_base: String,
    pub openai_model: String,
    pub database_url: Option<String>,
    pub data_dir: PathBuf,
    pub env: RunEnv,
    pub cutoff: DateTime<Utc>,
    pub min_age_days: i64,
    pub delete_delay: Duration,
    pub archive: Option<ArchiveConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let require = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let env = match get("SIEVE_ENV").as_deref() {
            Some("development") => RunEnv::Development,
            _ => RunEnv::Production,
        };

        let cutoff_raw = get("SIEVE_CUTOFF_DATE").unwrap_or_else(|| DEFAULT_CUTOFF_DATE.into());
        let cutoff = parse_cutoff(&cutoff_raw)?;

        let min_age_days = match get("SIEVE_MIN_AGE_DAYS") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid { name: "SIEVE_MIN_AGE_DAYS", value: v })?,
            None => DEFAULT_MIN_AGE_DAYS,
        };
        let delay_secs: u64 = match get("SIEVE_DELETE_DELAY_SECS") {
            Some(v) => v.parse().map_err(|_| ConfigError::Invalid { name: "SIEVE_DELETE_DELAY_SECS", value: v })?,
            None => DEFAULT_DELETE_DELAY_SECS,
        };

        Ok(Self {
            x_bearer_token: require("X_BEARER_TOKEN")?,
            x_api_base: get("X_API_BASE").unwrap_or_else(|| DEFAULT_X_API_BASE.into()),
            openai_api_key: require("OPENAI_API_KEY")?,
            openai_api_base: get("OPENAI_API_BASE").unwrap_or_else(|| DEFAULT_OPENAI_API_BASE.into()),
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.into()),
            database_url: get("DATABASE_URL"),
            data_dir: get("SIEVE_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("data")),
            env,
            cutoff,
            min_age_days,
            delete_delay: Duration::from_secs(delay_secs),
            archive: archive_from(&get),
        })
    }
}

// All three credentials or nothing; a partial set disables archiving.
fn archive_from<G>(get: &G) -> Option<ArchiveConfig>
where
    G: Fn(&str) -> Option<String>,
{
    let account_id = get("R2_ACCOUNT_ID")?;
    let access_key_id = get("R2_ACCESS_KEY_ID")?;
    let secret_access_key = get("R2_SECRET_ACCESS_KEY")?;
    let endpoint = get("S3_ENDPOINT")
        .unwrap_or_else(|| format!("https://{account_id}.r2.cloudflarestorage.com"));
    Some(ArchiveConfig {
        account_id,
        access_key_id,
        secret_access_key,
        bucket: get("R2_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.into()),
        endpoint,
        public_base_url: get("R2_PUBLIC_BASE_URL").map(|u| u.trim_end_matches('/').to_string()),
    })
}

fn parse_cutoff(raw: &str) -> Result<DateTime<Utc>, ConfigError> {
    let invalid = || ConfigError::Invalid { name: "SIEVE_CUTOFF_DATE", value: raw.to_string() };
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| invalid())?;
    let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(invalid)?;
    Ok(Utc.from_utc_datetime(&midnight))
}
