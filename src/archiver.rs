use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::DownloadError;
use crate::models::{MediaKind, MediaUploadResult, Post};
use crate::storage::ObjectStore;

pub const MEDIA_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// One downloadable attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaItem {
    pub kind: MediaKind,
    pub url: String,
}

/// Attachments of `post` that have something to download, in attachment order.
pub fn media_items(post: &Post) -> Vec<MediaItem> {
    post.media
        .iter()
        .filter_map(|m| m.download_url().map(|url| MediaItem { kind: m.kind, url: url.to_string() }))
        .collect()
}

/// `{account}/posts/{post_id}/{kind}_{ordinal}.{ext}`
pub fn object_key(account: &str, post_id: &str, ordinal: usize, kind: MediaKind) -> String {
    let (_, ext) = kind.archive_format();
    format!("{account}/posts/{post_id}/{}_{ordinal}.{ext}", kind.as_str())
}

/// Copies post media into object storage before a post may be deleted.
/// Best effort: every failure skips that item only.
pub struct MediaArchiver {
    store: Option<Arc<dyn ObjectStore>>,
    http: reqwest::Client,
    account: String,
}

impl MediaArchiver {
    pub fn new(store: Option<Arc<dyn ObjectStore>>, http: reqwest::Client, account: impl Into<String>) -> Self {
        Self { store, http, account: account.into() }
    }

    pub fn disabled() -> Self {
        Self::new(None, reqwest::Client::new(), "")
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let resp = self.http.get(url).timeout(MEDIA_DOWNLOAD_TIMEOUT).send().await?;
        if !resp.status().is_success() {
            return Err(DownloadError::Status(resp.status().as_u16()));
        }
        Ok(resp.bytes().await?.to_vec())
    }

    pub async fn archive(&self, post: &Post, items: &[MediaItem]) -> Vec<MediaUploadResult> {
        let Some(store) = &self.store else { return Vec::new() };

        let mut uploaded = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            info!(post_id = %post.id, "downloading {} {}/{}", item.kind.as_str(), idx + 1, items.len());
            let bytes = match self.download(&item.url).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(post_id = %post.id, url = %item.url, "media download failed, skipping: {e}");
                    continue;
                }
            };

            let (content_type, _) = item.kind.archive_format();
            let key = object_key(&self.account, &post.id, idx, item.kind);
            match store.put(bytes, &key, content_type).await {
                Ok(obj) => uploaded.push(MediaUploadResult {
                    kind: item.kind,
                    object_path: obj.object_path,
                    public_link: obj.public_link,
                    content_type: obj.content_type,
                    size: obj.size,
                }),
                Err(e) => warn!(post_id = %post.id, "archive upload failed, skipping: {e}"),
            }
        }
        uploaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaAttachment, VideoVariant};
    use chrono::Utc;

    #[test]
    fn keys_are_namespaced_and_typed() {
        assert_eq!(object_key("alice", "123", 0, MediaKind::Photo), "alice/posts/123/photo_0.jpg");
        assert_eq!(object_key("alice", "123", 2, MediaKind::Video), "alice/posts/123/video_2.mp4");
    }

    #[test]
    fn media_items_skip_undownloadable() {
        let post = Post {
            id: "1".into(),
            text: String::new(),
            created_at: Utc::now(),
            reply_to_post_id: None,
            reply_to_author_id: None,
            is_share: false,
            media: vec![
                MediaAttachment { kind: MediaKind::Photo, url: None, variants: vec![] },
                MediaAttachment::photo("https://img/a.jpg"),
                MediaAttachment::video(vec![VideoVariant {
                    url: "https://v/a.mp4".into(),
                    content_type: Some("video/mp4".into()),
                    bit_rate: Some(1),
                }]),
            ],
        };
        let items = media_items(&post);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], MediaItem { kind: MediaKind::Photo, url: "https://img/a.jpg".into() });
        assert_eq!(items[1].kind, MediaKind::Video);
    }

    #[tokio::test]
    async fn disabled_archiver_is_noop() {
        let a = MediaArchiver::disabled();
        assert!(!a.is_enabled());
        let post = Post {
            id: "1".into(),
            text: String::new(),
            created_at: Utc::now(),
            reply_to_post_id: None,
            reply_to_author_id: None,
            is_share: false,
            media: vec![MediaAttachment::photo("http://127.0.0.1:9/unreachable.jpg")],
        };
        assert!(a.archive(&post, &media_items(&post)).await.is_empty());
    }
}
