use std::sync::Arc;

use chrono::Utc;

use crate::models::RunState;
use crate::repo::{Repo, StoreResult};

/// In-memory copy of the persisted run state. Loaded once at start,
/// written back wholesale by `save`.
pub struct RunStateStore {
    repo: Arc<dyn Repo>,
    state: RunState,
}

impl RunStateStore {
    /// Zero counters and no cursor when nothing was persisted yet.
    pub async fn load(repo: Arc<dyn Repo>) -> StoreResult<Self> {
        let state = repo.load_state().await?.unwrap_or_default();
        Ok(Self { repo, state })
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn cursor(&self) -> Option<&str> {
        self.state.cursor.as_deref()
    }

    pub fn advance_cursor(&mut self, token: Option<String>) {
        self.state.cursor = token;
    }

    /// Forget the cursor and persist at once, so the next fetch starts from
    /// the newest post even if the run that follows fails early.
    pub async fn reset_cursor(&mut self) -> StoreResult<()> {
        self.state.cursor = None;
        self.save().await
    }

    /// Counters are only touched by the ledger when it records a decision.
    pub(crate) fn counters_mut(&mut self) -> &mut RunState {
        &mut self.state
    }

    /// Stamp `last_run` and replace the stored document.
    pub async fn save(&mut self) -> StoreResult<()> {
        self.state.last_run = Some(Utc::now());
        self.repo.upsert_state(&self.state).await
    }
}
