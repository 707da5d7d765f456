use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{DownloadError, ProviderError};
use crate::models::{Decision, Verdict};

/// At most this many images accompany one analysis request.
pub const MAX_IMAGES: usize = 4;
/// Longest edge sent to the provider; larger images are downscaled.
pub const MAX_IMAGE_EDGE: u32 = 2000;
pub const IMAGE_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10);
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_OUTPUT_TOKENS: u32 = 500;

const LOCATION_KEYWORDS: &[&str] = &["bali", "indonesia", "ubud", "canggu", "jakarta", "seminyak"];
const WORK_KEYWORDS: &[&str] = &[
    "work", "build", "ship", "code", "develop", "launch", "craft", "present", "post", "create",
    "design", "program",
];

/// Image ready for transmission: PNG bytes, base64 encoded.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub png_base64: String,
}

impl PreparedImage {
    pub fn data_url(&self) -> String {
        format!("data:image/png;base64,{}", self.png_base64)
    }
}

/// External multimodal reasoning service.
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    async fn complete(&self, text: &str, images: &[PreparedImage]) -> Result<Verdict, ProviderError>;
}

/// Turns post text plus image references into a verdict. Infallible.
#[async_trait]
pub trait ContentClassifier: Send + Sync {
    async fn analyze(&self, text: &str, image_urls: &[String]) -> Verdict;
}

pub struct Classifier {
    provider: Arc<dyn AnalysisProvider>,
    http: reqwest::Client,
}

impl Classifier {
    pub fn new(provider: Arc<dyn AnalysisProvider>, http: reqwest::Client) -> Self {
        Self { provider, http }
    }

    async fn fetch_image(&self, url: &str) -> Result<PreparedImage, DownloadError> {
        let resp = self.http.get(url).timeout(IMAGE_DOWNLOAD_TIMEOUT).send().await?;
        if !resp.status().is_success() {
            return Err(DownloadError::Status(resp.status().as_u16()));
        }
        let bytes = resp.bytes().await?;
        prepare_image(&bytes)
    }
}

#[async_trait]
impl ContentClassifier for Classifier {
    async fn analyze(&self, text: &str, image_urls: &[String]) -> Verdict {
        let mut images = Vec::new();
        for url in image_urls.iter().take(MAX_IMAGES) {
            match self.fetch_image(url).await {
                Ok(img) => images.push(img),
                Err(e) => warn!(%url, "skipping image: {e}"),
            }
        }
        debug!(prepared = images.len(), requested = image_urls.len(), "images prepared for analysis");

        match self.provider.complete(text, &images).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!("analysis provider failed, using keyword fallback: {e}");
                fallback_verdict(text)
            }
        }
    }
}

/// Decode, downscale to fit `MAX_IMAGE_EDGE` (aspect preserved) and re-encode as PNG.
pub fn prepare_image(bytes: &[u8]) -> Result<PreparedImage, DownloadError> {
    let mut img = image::load_from_memory(bytes)?;
    if img.width() > MAX_IMAGE_EDGE || img.height() > MAX_IMAGE_EDGE {
        img = img.thumbnail(MAX_IMAGE_EDGE, MAX_IMAGE_EDGE);
    }
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageOutputFormat::Png)?;
    Ok(PreparedImage {
        png_base64: base64::engine::general_purpose::STANDARD.encode(buf.into_inner()),
    })
}

/// Deterministic keyword heuristic used when the provider is unavailable.
pub fn fallback_verdict(text: &str) -> Verdict {
    let lower = text.to_lowercase();
    let has_location = LOCATION_KEYWORDS.iter().any(|kw| lower.contains(kw));
    let has_work = WORK_KEYWORDS.iter().any(|kw| lower.contains(kw));

    if has_location || has_work {
        let detected = LOCATION_KEYWORDS
            .iter()
            .chain(WORK_KEYWORDS)
            .filter(|kw| lower.contains(*kw))
            .map(|kw| kw.to_string())
            .collect();
        return Verdict {
            decision: Decision::Delete,
            confidence: 0.8,
            reason: format!("Keyword match: {}", if has_location { "location" } else { "work" }),
            detected_keywords: detected,
        };
    }
    Verdict {
        decision: Decision::Keep,
        confidence: 0.6,
        reason: "No obvious red flags (fallback analysis)".into(),
        detected_keywords: Vec::new(),
    }
}

// ---------------- OpenAI-compatible chat completions provider ----------------

pub struct OpenAiProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

fn build_prompt(text: &str, image_count: usize) -> String {
    format!(
        r#"Decide whether the following post from my account should be deleted.

Answer DELETE when the post:
- mentions Bali, Indonesia or any Indonesian place (Ubud, Canggu, Jakarta, Seminyak, ...)
- shows or talks about work: working, building, shipping, coding, developing, launching,
  crafting, presenting, posting updates, creating, designing, programming
- has images of laptops, desks, screens with code, meetings, talks, office setups or work gear
- pairs any location with work activity, or shows someone being productive
- mentions HeadshotPro, course creation or running an online business
- mentions my wealth, income, earnings or finances

Answer KEEP when the post:
- is purely personal (food, travel without work, friends, social life)
- mentions places outside Indonesia
- has no sign of work
- is about hobbies, entertainment or leisure

Post text: "{text}"
Attached images: {image_count}

Reply with a single JSON object:
{{"decision": "DELETE" | "KEEP", "confidence": 0.0-1.0, "reason": "short explanation", "detected_keywords": ["..."]}}"#
    )
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct RawVerdict {
    decision: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    detected_keywords: Vec<String>,
}

/// Parse the provider's strict-JSON answer.
pub fn parse_verdict(content: &str) -> Result<Verdict, ProviderError> {
    let raw: RawVerdict =
        serde_json::from_str(content.trim()).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    let decision = match raw.decision.trim().to_ascii_uppercase().as_str() {
        "DELETE" => Decision::Delete,
        "KEEP" => Decision::Keep,
        other => return Err(ProviderError::Malformed(format!("unknown decision '{other}'"))),
    };
    if !raw.confidence.is_finite() {
        return Err(ProviderError::Malformed("non-finite confidence".into()));
    }
    Ok(Verdict {
        decision,
        confidence: raw.confidence.clamp(0.0, 1.0),
        reason: raw.reason,
        detected_keywords: raw.detected_keywords,
    })
}

#[async_trait]
impl AnalysisProvider for OpenAiProvider {
    async fn complete(&self, text: &str, images: &[PreparedImage]) -> Result<Verdict, ProviderError> {
        let mut content = vec![json!({"type": "text", "text": build_prompt(text, images.len())})];
        content.extend(
            images
                .iter()
                .map(|img| json!({"type": "image_url", "image_url": {"url": img.data_url()}})),
        );
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": content}],
            "response_format": {"type": "json_object"},
            "max_tokens": MAX_OUTPUT_TOKENS,
        });

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(PROVIDER_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ProviderError::Status(resp.status().as_u16()));
        }
        let chat: ChatResponse = resp.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ProviderError::Empty)?;
        parse_verdict(&content)
    }
}
