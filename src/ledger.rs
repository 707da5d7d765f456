use std::sync::Arc;

use chrono::Utc;

use crate::models::{Decision, DecisionRecord, DeletionOutcome, MediaUploadResult, Post, Verdict};
use crate::repo::{Repo, StoreResult};
use crate::state::RunStateStore;

/// Everything the ledger needs to write one record.
pub struct NewDecision<'a> {
    pub post: &'a Post,
    pub decision: Decision,
    pub reason: &'a str,
    pub verdict: &'a Verdict,
    pub deletion: DeletionOutcome,
    pub media_uploads: Vec<MediaUploadResult>,
}

/// Append-only audit log and exactly-once guard.
pub struct DecisionLedger {
    repo: Arc<dyn Repo>,
}

impl DecisionLedger {
    pub fn new(repo: Arc<dyn Repo>) -> Self {
        Self { repo }
    }

    /// True once any run has recorded a decision for this post.
    pub async fn was_processed(&self, post_id: &str) -> StoreResult<bool> {
        self.repo.exists(post_id).await
    }

    /// Persist one record, then bump the lifetime counters: analyzed always,
    /// deleted only when the platform confirmed the delete, kept on KEEP.
    pub async fn record(&self, state: &mut RunStateStore, entry: NewDecision<'_>) -> StoreResult<DecisionRecord> {
        let now = Utc::now();
        let post = entry.post;
        let record = DecisionRecord {
            post_id: post.id.clone(),
            text: post.snippet(),
            created_at: post.created_at,
            decision: entry.decision,
            reason: entry.reason.to_string(),
            verdict: entry.verdict.clone(),
            has_images: post.has_images(),
            has_video: post.has_video(),
            is_reply: post.is_reply(),
            is_retweet: post.is_share,
            deletion: entry.deletion,
            analyzed_at: now,
            deleted_at: entry.deletion.succeeded.then_some(now),
            media_uploads: entry.media_uploads,
        };
        self.repo.insert(&record).await?;

        let counters = state.counters_mut();
        counters.total_analyzed += 1;
        if record.deletion.attempted && record.deletion.succeeded {
            counters.total_deleted += 1;
        }
        if record.decision == Decision::Keep {
            counters.total_kept += 1;
        }
        Ok(record)
    }

    pub async fn recent(&self, limit: usize) -> StoreResult<Vec<DecisionRecord>> {
        self.repo.recent(limit).await
    }

    pub async fn count(&self) -> StoreResult<u64> {
        self.repo.count().await
    }

    pub async fn count_failed_deletes(&self) -> StoreResult<u64> {
        self.repo.count_failed_deletes().await
    }
}
