use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::classifier::ContentClassifier;
use crate::models::{Decision, Post, Verdict};

/// Minimum classifier confidence for a DELETE verdict to be acted on.
pub const DELETE_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Which rule produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    BeforeCutoff,
    HasVideo,
    ReplyToOther,
    Share,
    Classifier,
}

impl Rule {
    pub fn is_automatic(&self) -> bool {
        !matches!(self, Rule::Classifier)
    }
}

#[derive(Debug, Clone)]
pub struct RuleOutcome {
    pub should_delete: bool,
    pub reason: String,
    pub verdict: Verdict,
    pub rule: Rule,
}

impl RuleOutcome {
    fn auto(rule: Rule, reason: String) -> Self {
        Self { should_delete: true, verdict: Verdict::auto_delete(reason.clone()), reason, rule }
    }

    pub fn decision(&self) -> Decision {
        if self.should_delete { Decision::Delete } else { Decision::Keep }
    }
}

/// Ordered, short-circuiting rules; the classifier is consulted only when no
/// structural rule matches.
pub struct RuleEngine {
    owner_id: String,
    cutoff: DateTime<Utc>,
    classifier: Arc<dyn ContentClassifier>,
}

impl RuleEngine {
    pub fn new(owner_id: impl Into<String>, cutoff: DateTime<Utc>, classifier: Arc<dyn ContentClassifier>) -> Self {
        Self { owner_id: owner_id.into(), cutoff, classifier }
    }

    pub async fn decide(&self, post: &Post) -> RuleOutcome {
        if post.created_at < self.cutoff {
            let reason = format!("Posted before {} (auto-delete)", self.cutoff.format("%Y-%m-%d"));
            return RuleOutcome::auto(Rule::BeforeCutoff, reason);
        }
        if post.has_video() {
            return RuleOutcome::auto(Rule::HasVideo, "Contains video (auto-delete)".into());
        }
        if post.is_reply_to_other(&self.owner_id) {
            return RuleOutcome::auto(Rule::ReplyToOther, "Reply to another user (auto-delete)".into());
        }
        if post.is_share {
            return RuleOutcome::auto(Rule::Share, "Repost (auto-delete)".into());
        }

        let verdict = self.classifier.analyze(&post.text, &post.image_urls()).await;
        let should_delete =
            verdict.decision == Decision::Delete && verdict.confidence >= DELETE_CONFIDENCE_THRESHOLD;
        RuleOutcome { should_delete, reason: format!("AI: {}", verdict.reason), verdict, rule: Rule::Classifier }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaAttachment, VideoVariant};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Classifier stub returning a fixed verdict and recording its inputs.
    struct Fixed {
        verdict: Verdict,
        calls: AtomicUsize,
        seen_urls: Mutex<Vec<String>>,
    }

    impl Fixed {
        fn new(decision: Decision, confidence: f64) -> Arc<Self> {
            Arc::new(Self {
                verdict: Verdict { decision, confidence, reason: "model says so".into(), detected_keywords: vec![] },
                calls: AtomicUsize::new(0),
                seen_urls: Mutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl ContentClassifier for Fixed {
        async fn analyze(&self, _text: &str, image_urls: &[String]) -> Verdict {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_urls.lock().unwrap().extend(image_urls.iter().cloned());
            self.verdict.clone()
        }
    }

    const OWNER: &str = "42";

    fn cutoff() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap()
    }

    fn post(text: &str) -> Post {
        Post {
            id: "100".into(),
            text: text.into(),
            created_at: Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap(),
            reply_to_post_id: None,
            reply_to_author_id: None,
            is_share: false,
            media: vec![],
        }
    }

    fn video() -> MediaAttachment {
        MediaAttachment::video(vec![VideoVariant {
            url: "https://video/1.mp4".into(),
            content_type: Some("video/mp4".into()),
            bit_rate: Some(832_000),
        }])
    }

    #[tokio::test]
    async fn old_posts_deleted_regardless_of_content() {
        let clf = Fixed::new(Decision::Keep, 1.0);
        let engine = RuleEngine::new(OWNER, cutoff(), clf.clone());
        let mut p = post("a lovely personal memory");
        p.created_at = Utc.with_ymd_and_hms(2018, 12, 31, 23, 59, 59).unwrap();
        let out = engine.decide(&p).await;
        assert!(out.should_delete);
        assert_eq!(out.rule, Rule::BeforeCutoff);
        assert_eq!(out.verdict.confidence, 1.0);
        assert_eq!(out.reason, "Posted before 2019-01-01 (auto-delete)");
        assert_eq!(clf.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn video_posts_deleted_without_classifier() {
        let clf = Fixed::new(Decision::Keep, 1.0);
        let engine = RuleEngine::new(OWNER, cutoff(), clf.clone());
        let mut p = post("");
        p.media = vec![MediaAttachment::photo("https://img/1.jpg"), video()];
        let out = engine.decide(&p).await;
        assert_eq!((out.should_delete, out.rule), (true, Rule::HasVideo));
        assert_eq!(out.verdict.decision, Decision::Delete);
        assert_eq!(clf.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn replies_to_others_deleted_self_replies_classified() {
        let clf = Fixed::new(Decision::Keep, 0.9);
        let engine = RuleEngine::new(OWNER, cutoff(), clf.clone());

        let mut other = post("@someone nice");
        other.reply_to_post_id = Some("7".into());
        other.reply_to_author_id = Some("99".into());
        let out = engine.decide(&other).await;
        assert_eq!((out.should_delete, out.rule), (true, Rule::ReplyToOther));
        assert_eq!(out.verdict.confidence, 1.0);

        // unknown target author counts as "other"
        other.reply_to_author_id = None;
        assert_eq!(engine.decide(&other).await.rule, Rule::ReplyToOther);

        let mut own = post("continuing my thread");
        own.reply_to_post_id = Some("8".into());
        own.reply_to_author_id = Some(OWNER.into());
        let out = engine.decide(&own).await;
        assert_eq!((out.should_delete, out.rule), (false, Rule::Classifier));
        assert_eq!(clf.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shares_deleted() {
        let engine = RuleEngine::new(OWNER, cutoff(), Fixed::new(Decision::Keep, 1.0));
        let mut p = post("RT something");
        p.is_share = true;
        let out = engine.decide(&p).await;
        assert_eq!((out.should_delete, out.rule), (true, Rule::Share));
    }

    #[tokio::test]
    async fn classifier_threshold_applies() {
        let engine = RuleEngine::new(OWNER, cutoff(), Fixed::new(Decision::Delete, 0.5));
        let out = engine.decide(&post("at my desk")).await;
        assert!(out.should_delete);
        assert_eq!(out.reason, "AI: model says so");

        let engine = RuleEngine::new(OWNER, cutoff(), Fixed::new(Decision::Delete, 0.49));
        let out = engine.decide(&post("at my desk")).await;
        assert!(!out.should_delete);
        assert_eq!(out.decision(), Decision::Keep);
        assert_eq!(out.verdict.decision, Decision::Delete);
    }

    #[tokio::test]
    async fn classifier_receives_photo_urls_only() {
        let clf = Fixed::new(Decision::Keep, 0.7);
        let engine = RuleEngine::new(OWNER, cutoff(), clf.clone());
        let mut p = post("beach");
        p.media = vec![MediaAttachment::photo("https://img/a.jpg"), MediaAttachment::photo("https://img/b.jpg")];
        engine.decide(&p).await;
        assert_eq!(*clf.seen_urls.lock().unwrap(), vec!["https://img/a.jpg".to_string(), "https://img/b.jpg".to_string()]);
    }
}
