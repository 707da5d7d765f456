use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::SourceError;
use crate::models::{MediaAttachment, MediaKind, Post, VideoVariant};

/// The platform only accepts page sizes in this range.
pub const MIN_PAGE_SIZE: u32 = 5;
pub const MAX_PAGE_SIZE: u32 = 100;

const TWEET_FIELDS: &str = "created_at,text,attachments,referenced_tweets,in_reply_to_user_id";
const EXPANSIONS: &str = "attachments.media_keys";
const MEDIA_FIELDS: &str = "type,url,preview_image_url,variants";

pub fn clamp_page_size(limit: u32) -> u32 {
    limit.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub username: String,
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub posts: Vec<Post>,
    pub next_cursor: Option<String>,
}

/// Read/delete access to the account's post history.
#[async_trait]
pub trait PostSource: Send + Sync {
    async fn me(&self) -> Result<Account, SourceError>;
    async fn fetch_page(&self, account_id: &str, max_results: u32, cursor: Option<&str>) -> Result<Page, SourceError>;
    async fn delete(&self, post_id: &str) -> Result<(), SourceError>;
}

// ---------------- wire shape (v2 timeline response) ----------------

#[derive(Debug, Deserialize)]
pub struct WirePage {
    #[serde(default)]
    pub data: Vec<WirePost>,
    #[serde(default)]
    pub includes: Option<WireIncludes>,
    #[serde(default)]
    pub meta: Option<WireMeta>,
}

#[derive(Debug, Deserialize)]
pub struct WirePost {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub in_reply_to_user_id: Option<String>,
    #[serde(default)]
    pub referenced_tweets: Vec<WireReference>,
    #[serde(default)]
    pub attachments: Option<WireAttachments>,
}

#[derive(Debug, Deserialize)]
pub struct WireReference {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct WireAttachments {
    #[serde(default)]
    pub media_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct WireIncludes {
    #[serde(default)]
    pub media: Vec<WireMedia>,
}

#[derive(Debug, Deserialize)]
pub struct WireMedia {
    pub media_key: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub variants: Vec<WireVariant>,
}

#[derive(Debug, Deserialize)]
pub struct WireVariant {
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub bit_rate: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct WireMeta {
    #[serde(default)]
    pub next_token: Option<String>,
}

fn attachment_from(media: &WireMedia) -> Option<MediaAttachment> {
    let kind = match media.kind.as_str() {
        "photo" => MediaKind::Photo,
        "video" | "animated_gif" => MediaKind::Video,
        _ => return None,
    };
    let variants = media
        .variants
        .iter()
        .map(|v| VideoVariant { url: v.url.clone(), content_type: v.content_type.clone(), bit_rate: v.bit_rate })
        .collect();
    Some(MediaAttachment {
        kind,
        url: if kind == MediaKind::Photo { media.url.clone() } else { None },
        variants,
    })
}

/// Map one timeline response into canonical posts, resolving media keys
/// against the response's includes. Unknown keys are dropped.
pub fn posts_from_page(page: WirePage) -> Page {
    let media_by_key: HashMap<&str, &WireMedia> = page
        .includes
        .as_ref()
        .map(|inc| inc.media.iter().map(|m| (m.media_key.as_str(), m)).collect())
        .unwrap_or_default();

    let posts = page
        .data
        .iter()
        .map(|p| {
            let media = p
                .attachments
                .iter()
                .flat_map(|a| a.media_keys.iter())
                .filter_map(|key| media_by_key.get(key.as_str()))
                .filter_map(|m| attachment_from(m))
                .collect();
            Post {
                id: p.id.clone(),
                text: p.text.clone(),
                created_at: p.created_at,
                reply_to_post_id: p.referenced_tweets.iter().find(|r| r.kind == "replied_to").map(|r| r.id.clone()),
                reply_to_author_id: p.in_reply_to_user_id.clone(),
                is_share: p.referenced_tweets.iter().any(|r| r.kind == "retweeted"),
                media,
            }
        })
        .collect();

    Page { posts, next_cursor: page.meta.and_then(|m| m.next_token) }
}

// ---------------- HTTP client ----------------

pub struct XApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct WireUser {
    id: String,
    username: String,
}

#[derive(Deserialize)]
struct WireDeleted {
    deleted: bool,
}

impl XApiClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self { http, base_url: base_url.into().trim_end_matches('/').to_string(), token: token.into() }
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, SourceError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        match status.as_u16() {
            401 => Err(SourceError::Unauthorized),
            429 => {
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(SourceError::RateLimited { retry_after })
            }
            code => {
                let body = resp.text().await.unwrap_or_default();
                Err(SourceError::Status { status: code, body })
            }
        }
    }
}

#[async_trait]
impl PostSource for XApiClient {
    async fn me(&self) -> Result<Account, SourceError> {
        let resp = self
            .http
            .get(format!("{}/2/users/me", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let user: Envelope<WireUser> = Self::check(resp).await?.json().await?;
        Ok(Account { id: user.data.id, username: user.data.username })
    }

    async fn fetch_page(&self, account_id: &str, max_results: u32, cursor: Option<&str>) -> Result<Page, SourceError> {
        let max_results = clamp_page_size(max_results).to_string();
        let mut query = vec![
            ("max_results", max_results.as_str()),
            ("tweet.fields", TWEET_FIELDS),
            ("expansions", EXPANSIONS),
            ("media.fields", MEDIA_FIELDS),
        ];
        if let Some(token) = cursor {
            query.push(("pagination_token", token));
        }
        debug!(account_id, ?cursor, "fetching timeline page");
        let resp = self
            .http
            .get(format!("{}/2/users/{account_id}/tweets", self.base_url))
            .bearer_auth(&self.token)
            .query(&query)
            .send()
            .await?;
        let page: WirePage = Self::check(resp).await?.json().await?;
        Ok(posts_from_page(page))
    }

    async fn delete(&self, post_id: &str) -> Result<(), SourceError> {
        let resp = self
            .http
            .delete(format!("{}/2/tweets/{post_id}", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let body: Envelope<WireDeleted> = Self::check(resp).await?.json().await?;
        if !body.data.deleted {
            return Err(SourceError::NotDeleted(post_id.to_string()));
        }
        Ok(())
    }
}
