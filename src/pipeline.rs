use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::archiver::{media_items, MediaArchiver};
use crate::error::{PipelineError, StoreError};
use crate::ledger::{DecisionLedger, NewDecision};
use crate::models::{Decision, DecisionRecord, DeletionOutcome, Post};
use crate::rules::RuleEngine;
use crate::source::{clamp_page_size, Account, PostSource};
use crate::state::RunStateStore;

pub const DEFAULT_LIMIT: u32 = 10;

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Perform deletions; false is a dry run.
    pub execute: bool,
    /// Requested page size, clamped to what the platform accepts.
    pub limit: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { execute: false, limit: DEFAULT_LIMIT }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub min_age_days: i64,
    pub delete_delay: Duration,
}

/// Counts for a single run, distinct from the lifetime counters in `RunState`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub fetched: usize,
    pub analyzed: usize,
    pub marked_for_delete: usize,
    pub deleted: usize,
    pub delete_failures: usize,
    pub kept: usize,
    pub skipped_seen: usize,
    pub skipped_recent: usize,
    pub reached_end: bool,
    /// Set when a platform error cut the run short.
    pub platform_error: Option<String>,
}

/// What happened to one post.
#[derive(Debug, Clone, PartialEq)]
pub enum PostOutcome {
    AlreadyProcessed,
    TooRecent,
    Recorded(DecisionRecord),
}

pub struct Pipeline {
    source: Arc<dyn PostSource>,
    rules: RuleEngine,
    archiver: MediaArchiver,
    ledger: DecisionLedger,
    account: Account,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn PostSource>,
        rules: RuleEngine,
        archiver: MediaArchiver,
        ledger: DecisionLedger,
        account: Account,
        settings: PipelineSettings,
    ) -> Self {
        Self { source, rules, archiver, ledger, account, settings }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Fetch one page and process it. The run state is saved on every exit
    /// path, including errors, before the result is returned.
    pub async fn run(&self, state: &mut RunStateStore, opts: &RunOptions) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary::default();
        let outcome = self.run_page(state, opts, &mut summary).await;

        if let Err(save_err) = state.save().await {
            error!("failed to save run state: {save_err}");
            return match outcome {
                Err(e) => Err(e),
                Ok(()) => Err(save_err.into()),
            };
        }
        info!("progress saved");

        match outcome {
            Ok(()) => {
                log_summary(&summary, opts.execute);
                Ok(summary)
            }
            Err(PipelineError::Source(e)) => {
                error!("platform API error, ending run early: {e}");
                summary.platform_error = Some(e.to_string());
                log_summary(&summary, opts.execute);
                Ok(summary)
            }
            Err(e) => Err(e),
        }
    }

    async fn run_page(
        &self,
        state: &mut RunStateStore,
        opts: &RunOptions,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let page_size = clamp_page_size(opts.limit);
        let cursor = state.cursor().map(str::to_owned);
        match &cursor {
            Some(_) => info!("fetching up to {page_size} posts (continuing from previous run)"),
            None => info!("fetching up to {page_size} posts (starting from newest)"),
        }

        let page = self.source.fetch_page(&self.account.id, page_size, cursor.as_deref()).await?;
        if page.posts.is_empty() {
            info!("no more posts to process; next run starts from newest");
            state.advance_cursor(None);
            summary.reached_end = true;
            return Ok(());
        }
        summary.fetched = page.posts.len();
        info!("found {} posts to review", page.posts.len());

        for post in &page.posts {
            match self.process_post(state, post, opts.execute).await? {
                PostOutcome::AlreadyProcessed => summary.skipped_seen += 1,
                PostOutcome::TooRecent => summary.skipped_recent += 1,
                PostOutcome::Recorded(rec) => {
                    summary.analyzed += 1;
                    if rec.decision == Decision::Keep {
                        summary.kept += 1;
                    } else {
                        summary.marked_for_delete += 1;
                    }
                    if rec.deletion.succeeded {
                        summary.deleted += 1;
                    } else if rec.deletion.attempted {
                        summary.delete_failures += 1;
                    }
                }
            }
        }

        match page.next_cursor {
            Some(next) => {
                info!("cursor saved; next run continues from here");
                state.advance_cursor(Some(next));
            }
            None => {
                info!("reached the end of history; next run starts from newest");
                state.advance_cursor(None);
                summary.reached_end = true;
            }
        }
        Ok(())
    }

    /// Filter, archive, classify, act, and record a single post. The ledger
    /// lookup precedes any side effect.
    pub async fn process_post(
        &self,
        state: &mut RunStateStore,
        post: &Post,
        execute: bool,
    ) -> Result<PostOutcome, StoreError> {
        if self.ledger.was_processed(&post.id).await? {
            info!(post_id = %post.id, "skipping already processed post");
            return Ok(PostOutcome::AlreadyProcessed);
        }
        let age_days = (Utc::now() - post.created_at).num_days();
        if age_days < self.settings.min_age_days {
            info!(
                post_id = %post.id,
                "skipping recent post ({age_days} days old, waiting for {})",
                self.settings.min_age_days
            );
            return Ok(PostOutcome::TooRecent);
        }

        // replies to other people are deleted outright; nothing worth keeping
        let mut media_uploads = Vec::new();
        if !post.is_reply_to_other(&self.account.id) {
            let items = media_items(post);
            if !items.is_empty() && self.archiver.is_enabled() {
                info!(post_id = %post.id, "archiving {} media item(s)", items.len());
                media_uploads = self.archiver.archive(post, &items).await;
            }
        }

        let outcome = self.rules.decide(post).await;
        let decision = outcome.decision();
        let date = post.created_at.format("%Y-%m-%d").to_string();
        let preview = post.preview();

        let deletion = if outcome.should_delete && execute {
            let result = match self.source.delete(&post.id).await {
                Ok(()) => {
                    info!(post_id = %post.id, decision = %decision, reason = %outcome.reason, "DELETED [{date}]: {preview}");
                    DeletionOutcome::succeeded()
                }
                Err(e) => {
                    warn!(
                        post_id = %post.id,
                        decision = %decision,
                        reason = %outcome.reason,
                        "DELETE FAILED [{date}]: {preview}: {e}"
                    );
                    DeletionOutcome::failed()
                }
            };
            tokio::time::sleep(self.settings.delete_delay).await;
            result
        } else {
            if outcome.should_delete {
                info!(post_id = %post.id, decision = %decision, reason = %outcome.reason, "WOULD DELETE [{date}]: {preview}");
            } else {
                info!(post_id = %post.id, decision = %decision, reason = %outcome.reason, "KEEPING [{date}]: {preview}");
            }
            DeletionOutcome::skipped()
        };

        let record = self
            .ledger
            .record(
                state,
                NewDecision {
                    post,
                    decision,
                    reason: &outcome.reason,
                    verdict: &outcome.verdict,
                    deletion,
                    media_uploads,
                },
            )
            .await?;
        Ok(PostOutcome::Recorded(record))
    }
}

fn log_summary(s: &RunSummary, execute: bool) {
    info!(
        analyzed = s.analyzed,
        marked_for_delete = s.marked_for_delete,
        kept = s.kept,
        skipped_seen = s.skipped_seen,
        skipped_recent = s.skipped_recent,
        "run summary"
    );
    if execute {
        info!(deleted = s.deleted, failed = s.delete_failures, "deletions performed");
    }
}
