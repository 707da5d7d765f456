use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info};

use crate::config::ArchiveConfig;
use crate::error::StorageError;

/// Where an uploaded object landed.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub object_path: String,
    pub public_link: String,
    pub content_type: String,
    pub size: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bytes: Vec<u8>, key: &str, content_type: &str) -> Result<StoredObject, StorageError>;
}

// ---------------- S3 implementation (Cloudflare R2 / MinIO compatible) ----------------
pub struct S3ObjectStore {
    bucket: String,
    client: aws_sdk_s3::Client,
    public_base_url: Option<String>,
}

impl S3ObjectStore {
    pub async fn new(cfg: &ArchiveConfig) -> anyhow::Result<Self> {
        use aws_credential_types::provider::SharedCredentialsProvider;
        use aws_credential_types::Credentials;

        let creds = Credentials::new(
            cfg.access_key_id.clone(),
            cfg.secret_access_key.clone(),
            None,
            None,
            "static",
        );
        let conf = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("auto"))
            .endpoint_url(cfg.endpoint.clone())
            .credentials_provider(SharedCredentialsProvider::new(creds))
            .load()
            .await;
        // Path-style addressing: R2 and local MinIO endpoints lack wildcard DNS
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf)
            .force_path_style(true)
            .build();
        let client = aws_sdk_s3::Client::from_conf(s3_conf);
        info!(
            "Initialized archive client for bucket '{}' at {} (account {})",
            cfg.bucket, cfg.endpoint, cfg.account_id
        );

        Ok(Self {
            bucket: cfg.bucket.clone(),
            client,
            public_base_url: cfg.public_base_url.clone(),
        })
    }

    fn link_for(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{base}/{key}"),
            None => format!("s3://{}/{}", self.bucket, key),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, bytes: Vec<u8>, key: &str, content_type: &str) -> Result<StoredObject, StorageError> {
        use aws_sdk_s3::primitives::ByteStream;
        let size = bytes.len() as u64;
        let put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type);
        if let Err(e) = put.send().await {
            // Full SDK error goes to the log; callers get a concise message
            error!("put_object failed key={key} bucket={} err={:?}", self.bucket, e);
            let hint = if e.to_string().contains("NoSuchBucket") {
                " (bucket missing or not yet propagated)"
            } else if e.to_string().contains("AccessDenied") {
                " (check R2_ACCESS_KEY_ID/R2_SECRET_ACCESS_KEY permissions)"
            } else {
                ""
            };
            return Err(StorageError::Upload { key: key.to_string(), message: format!("{e}{hint}") });
        }
        info!("Uploaded {key} ({size} bytes)");
        Ok(StoredObject {
            object_path: key.to_string(),
            public_link: self.link_for(key),
            content_type: content_type.to_string(),
            size,
        })
    }
}

/// Archive backend when credentials are configured; `None` disables archiving.
pub async fn build_object_store(cfg: Option<&ArchiveConfig>) -> anyhow::Result<Option<Arc<dyn ObjectStore>>> {
    let Some(cfg) = cfg else { return Ok(None) };
    let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(cfg).await?);
    Ok(Some(store))
}
