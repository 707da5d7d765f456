use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platform-assigned post identifier (stable, opaque).
pub type PostId = String;

/// Characters of post text kept in a ledger record.
pub const SNIPPET_CHARS: usize = 200;
/// Characters of post text shown next to a decision on the console.
pub const PREVIEW_CHARS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video, // also covers animated gifs
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
        }
    }

    /// Content type and file extension used when archiving this kind.
    pub fn archive_format(&self) -> (&'static str, &'static str) {
        match self {
            MediaKind::Photo => ("image/jpeg", "jpg"),
            MediaKind::Video => ("video/mp4", "mp4"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoVariant {
    pub url: String,
    pub content_type: Option<String>,
    pub bit_rate: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub kind: MediaKind,
    pub url: Option<String>, // photos only; videos carry variants
    #[serde(default)]
    pub variants: Vec<VideoVariant>,
}

impl MediaAttachment {
    pub fn photo(url: impl Into<String>) -> Self {
        Self { kind: MediaKind::Photo, url: Some(url.into()), variants: Vec::new() }
    }

    pub fn video(variants: Vec<VideoVariant>) -> Self {
        Self { kind: MediaKind::Video, url: None, variants }
    }

    /// Highest bit-rate mp4 variant, if any.
    pub fn best_variant(&self) -> Option<&VideoVariant> {
        self.variants
            .iter()
            .filter(|v| v.content_type.as_deref() == Some("video/mp4"))
            .max_by_key(|v| v.bit_rate.unwrap_or(0))
    }

    /// URL the archiver downloads for this attachment.
    pub fn download_url(&self) -> Option<&str> {
        match self.kind {
            MediaKind::Photo => self.url.as_deref(),
            MediaKind::Video => self.best_variant().map(|v| v.url.as_str()),
        }
    }
}

/// Canonical internal post representation. Built from the platform wire
/// shape by `source::posts_from_page`; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub reply_to_post_id: Option<PostId>,
    pub reply_to_author_id: Option<String>,
    pub is_share: bool,
    pub media: Vec<MediaAttachment>,
}

impl Post {
    pub fn has_video(&self) -> bool {
        self.media.iter().any(|m| m.kind == MediaKind::Video)
    }

    pub fn has_images(&self) -> bool {
        self.media.iter().any(|m| m.kind == MediaKind::Photo)
    }

    pub fn is_reply(&self) -> bool {
        self.reply_to_post_id.is_some()
    }

    /// A reply whose target author is someone other than `owner_id`.
    pub fn is_reply_to_other(&self, owner_id: &str) -> bool {
        self.is_reply() && self.reply_to_author_id.as_deref() != Some(owner_id)
    }

    pub fn image_urls(&self) -> Vec<String> {
        self.media
            .iter()
            .filter(|m| m.kind == MediaKind::Photo)
            .filter_map(|m| m.url.clone())
            .collect()
    }

    pub fn snippet(&self) -> String {
        self.text.chars().take(SNIPPET_CHARS).collect()
    }

    pub fn preview(&self) -> String {
        self.text
            .chars()
            .take(PREVIEW_CHARS)
            .map(|c| if c == '\n' { ' ' } else { c })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Delete,
    Keep,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Delete => "DELETE",
            Decision::Keep => "KEEP",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured classification output for one post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub decision: Decision,
    pub confidence: f64,
    pub reason: String,
    #[serde(default)]
    pub detected_keywords: Vec<String>,
}

impl Verdict {
    /// Verdict of a structural rule: certain, no keywords.
    pub fn auto_delete(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Delete,
            confidence: 1.0,
            reason: reason.into(),
            detected_keywords: Vec::new(),
        }
    }
}

/// Whether a delete call was made and whether it went through.
/// Distinct from the decision: a DELETE in dry-run is never attempted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionOutcome {
    pub attempted: bool,
    pub succeeded: bool,
}

impl DeletionOutcome {
    pub fn skipped() -> Self {
        Self::default()
    }
    pub fn succeeded() -> Self {
        Self { attempted: true, succeeded: true }
    }
    pub fn failed() -> Self {
        Self { attempted: true, succeeded: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaUploadResult {
    pub kind: MediaKind,
    pub object_path: String,
    pub public_link: String,
    pub content_type: String,
    pub size: u64,
}

/// One immutable ledger entry per post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub post_id: PostId,
    pub text: String, // truncated to SNIPPET_CHARS
    pub created_at: DateTime<Utc>,
    pub decision: Decision,
    pub reason: String,
    pub verdict: Verdict,
    pub has_images: bool,
    pub has_video: bool,
    pub is_reply: bool,
    pub is_retweet: bool,
    pub deletion: DeletionOutcome,
    pub analyzed_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub media_uploads: Vec<MediaUploadResult>,
}

/// Persisted singleton: lifetime counters plus the resumption cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub total_analyzed: u64,
    pub total_deleted: u64,
    pub total_kept: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub cursor: Option<String>, // None = start from newest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(url: &str, ct: &str, rate: Option<u64>) -> VideoVariant {
        VideoVariant { url: url.into(), content_type: Some(ct.into()), bit_rate: rate }
    }

    #[test]
    fn best_variant_prefers_highest_mp4_bitrate() {
        let m = MediaAttachment::video(vec![
            variant("https://v/low.mp4", "video/mp4", Some(256_000)),
            variant("https://v/playlist.m3u8", "application/x-mpegURL", None),
            variant("https://v/high.mp4", "video/mp4", Some(2_176_000)),
        ]);
        assert_eq!(m.download_url(), Some("https://v/high.mp4"));
    }

    #[test]
    fn video_without_mp4_has_no_download_url() {
        let m = MediaAttachment::video(vec![variant("https://v/p.m3u8", "application/x-mpegURL", None)]);
        assert!(m.download_url().is_none());
    }

    #[test]
    fn snippet_truncates_on_char_boundary() {
        let post = Post {
            id: "1".into(),
            text: "ü".repeat(300),
            created_at: Utc::now(),
            reply_to_post_id: None,
            reply_to_author_id: None,
            is_share: false,
            media: vec![],
        };
        assert_eq!(post.snippet().chars().count(), SNIPPET_CHARS);
    }

    #[test]
    fn decision_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Decision::Delete).unwrap(), "\"DELETE\"");
        let d: Decision = serde_json::from_str("\"KEEP\"").unwrap();
        assert_eq!(d, Decision::Keep);
    }
}
