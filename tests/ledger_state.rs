use std::sync::Arc;

use chrono::{TimeZone, Utc};
use sieve::error::StoreError;
use sieve::ledger::{DecisionLedger, NewDecision};
use sieve::models::{Decision, DeletionOutcome, Post, RunState, Verdict};
use sieve::repo::file::FileRepo;
use sieve::repo::{LedgerRepo, Repo, StateRepo};
use sieve::state::RunStateStore;

/// Helper that returns a fresh repository in its own temp dir.
fn repo(dir: &tempfile::TempDir, suffix: &str) -> Arc<dyn Repo> {
    Arc::new(FileRepo::open(dir.path(), suffix).unwrap())
}

fn post(id: &str, text: &str) -> Post {
    Post {
        id: id.into(),
        text: text.into(),
        created_at: Utc.with_ymd_and_hms(2022, 2, 2, 9, 0, 0).unwrap(),
        reply_to_post_id: None,
        reply_to_author_id: None,
        is_share: false,
        media: vec![],
    }
}

fn keep() -> Verdict {
    Verdict { decision: Decision::Keep, confidence: 0.9, reason: "harmless".into(), detected_keywords: vec![] }
}

fn entry<'a>(post: &'a Post, decision: Decision, verdict: &'a Verdict, deletion: DeletionOutcome) -> NewDecision<'a> {
    NewDecision { post, decision, reason: "because", verdict, deletion, media_uploads: vec![] }
}

#[tokio::test]
async fn record_once_then_duplicate_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let r = repo(&dir, "");
    let ledger = DecisionLedger::new(r.clone());
    let mut state = RunStateStore::load(r.clone()).await.unwrap();
    let p = post("1", "hello");
    let v = keep();

    assert!(!ledger.was_processed("1").await.unwrap());
    let rec = ledger.record(&mut state, entry(&p, Decision::Keep, &v, DeletionOutcome::skipped())).await.unwrap();
    assert_eq!(rec.post_id, "1");
    assert!(ledger.was_processed("1").await.unwrap());

    // a second record for the same post must not land or bump counters
    let err = ledger
        .record(&mut state, entry(&p, Decision::Keep, &v, DeletionOutcome::skipped()))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(ref id) if id == "1"));
    assert_eq!(ledger.count().await.unwrap(), 1);
    assert_eq!(state.state().total_analyzed, 1);
}

#[tokio::test]
async fn counters_follow_decision_and_deletion_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let r = repo(&dir, "");
    let ledger = DecisionLedger::new(r.clone());
    let mut state = RunStateStore::load(r.clone()).await.unwrap();
    let del = Verdict::auto_delete("Contains video (auto-delete)");
    let k = keep();

    let posts = [post("1", "a"), post("2", "b"), post("3", "c"), post("4", "d")];
    let cases = [
        (Decision::Keep, &k, DeletionOutcome::skipped()),
        (Decision::Delete, &del, DeletionOutcome::skipped()),
        (Decision::Delete, &del, DeletionOutcome::succeeded()),
        (Decision::Delete, &del, DeletionOutcome::failed()),
    ];
    for (p, (decision, verdict, deletion)) in posts.iter().zip(cases) {
        ledger.record(&mut state, entry(p, decision, verdict, deletion)).await.unwrap();
    }

    let s = state.state();
    assert_eq!(s.total_analyzed, 4);
    assert_eq!(s.total_deleted, 1);
    assert_eq!(s.total_kept, 1);
    assert!(s.total_deleted + s.total_kept <= s.total_analyzed);
    assert_eq!(ledger.count_failed_deletes().await.unwrap(), 1);

    let recs = ledger.recent(10).await.unwrap();
    let succeeded = recs.iter().find(|r| r.post_id == "3").unwrap();
    assert!(succeeded.deleted_at.is_some());
    let failed = recs.iter().find(|r| r.post_id == "4").unwrap();
    assert!(failed.deletion.attempted && !failed.deletion.succeeded);
    assert!(failed.deleted_at.is_none());
}

#[tokio::test]
async fn long_text_is_stored_as_snippet() {
    let dir = tempfile::tempdir().unwrap();
    let r = repo(&dir, "");
    let ledger = DecisionLedger::new(r.clone());
    let mut state = RunStateStore::load(r.clone()).await.unwrap();
    let p = post("1", &"é".repeat(500));
    let v = keep();

    let rec = ledger.record(&mut state, entry(&p, Decision::Keep, &v, DeletionOutcome::skipped())).await.unwrap();
    assert_eq!(rec.text.chars().count(), 200);
}

#[tokio::test]
async fn ledger_and_state_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let r = repo(&dir, "");
        let ledger = DecisionLedger::new(r.clone());
        let mut state = RunStateStore::load(r.clone()).await.unwrap();
        let v = keep();
        for id in ["1", "2"] {
            let p = post(id, "x");
            ledger.record(&mut state, entry(&p, Decision::Keep, &v, DeletionOutcome::skipped())).await.unwrap();
        }
        state.advance_cursor(Some("tok".into()));
        state.save().await.unwrap();
    }

    let r = repo(&dir, "");
    assert!(r.exists("1").await.unwrap());
    assert!(r.exists("2").await.unwrap());
    assert_eq!(r.count().await.unwrap(), 2);
    let state = RunStateStore::load(r).await.unwrap();
    assert_eq!(state.cursor(), Some("tok"));
    assert_eq!(state.state().total_kept, 2);
    assert!(state.state().last_run.is_some());
}

#[tokio::test]
async fn missing_state_loads_as_zero() {
    let dir = tempfile::tempdir().unwrap();
    let state = RunStateStore::load(repo(&dir, "")).await.unwrap();
    assert_eq!(*state.state(), RunState::default());
}

#[tokio::test]
async fn state_write_replaces_document_and_leaves_no_temp_file() {
    let dir = tempfile::tempdir().unwrap();
    let r = repo(&dir, "");
    let first = RunState { total_analyzed: 5, cursor: Some("a".into()), ..Default::default() };
    r.upsert_state(&first).await.unwrap();
    let second = RunState { total_analyzed: 6, ..Default::default() };
    r.upsert_state(&second).await.unwrap();

    assert_eq!(r.load_state().await.unwrap(), Some(second));
    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["state.json".to_string()]);
}

#[tokio::test]
async fn torn_trailing_line_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    {
        let r = repo(&dir, "");
        let ledger = DecisionLedger::new(r.clone());
        let mut state = RunStateStore::load(r.clone()).await.unwrap();
        let p = post("1", "x");
        let v = keep();
        ledger.record(&mut state, entry(&p, Decision::Keep, &v, DeletionOutcome::skipped())).await.unwrap();
    }
    // simulate a crash mid-append
    let path = dir.path().join("decisions.jsonl");
    let mut raw = std::fs::read_to_string(&path).unwrap();
    raw.push_str("{\"post_id\":\"2\",\"te");
    std::fs::write(&path, raw).unwrap();

    let r = repo(&dir, "");
    assert_eq!(r.count().await.unwrap(), 1);
    assert!(!r.exists("2").await.unwrap());

    // records appended after recovery must survive later reopens
    for id in ["3", "4"] {
        let r = repo(&dir, "");
        let ledger = DecisionLedger::new(r.clone());
        let mut state = RunStateStore::load(r.clone()).await.unwrap();
        let p = post(id, "x");
        let v = keep();
        ledger.record(&mut state, entry(&p, Decision::Keep, &v, DeletionOutcome::skipped())).await.unwrap();
    }
    let r = Arc::new(FileRepo::open(dir.path(), "").expect("ledger reopens after torn-line recovery"));
    assert!(r.exists("3").await.unwrap());
    assert!(r.exists("4").await.unwrap());
    assert_eq!(r.count().await.unwrap(), 3);
    assert!(std::fs::read_to_string(&path).unwrap().ends_with('\n'));
}

#[tokio::test]
async fn missing_final_newline_is_restored_before_append() {
    let dir = tempfile::tempdir().unwrap();
    {
        let r = repo(&dir, "");
        let ledger = DecisionLedger::new(r.clone());
        let mut state = RunStateStore::load(r.clone()).await.unwrap();
        let p = post("1", "x");
        let v = keep();
        ledger.record(&mut state, entry(&p, Decision::Keep, &v, DeletionOutcome::skipped())).await.unwrap();
    }
    let path = dir.path().join("decisions.jsonl");
    let raw = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, raw.trim_end()).unwrap();

    {
        let r = repo(&dir, "");
        let ledger = DecisionLedger::new(r.clone());
        let mut state = RunStateStore::load(r.clone()).await.unwrap();
        let p = post("2", "y");
        let v = keep();
        ledger.record(&mut state, entry(&p, Decision::Keep, &v, DeletionOutcome::skipped())).await.unwrap();
    }

    let r = repo(&dir, "");
    assert!(r.exists("1").await.unwrap());
    assert!(r.exists("2").await.unwrap());
}

#[tokio::test]
async fn environments_are_isolated_and_clearable() {
    let dir = tempfile::tempdir().unwrap();
    let prod = repo(&dir, "");
    let dev = repo(&dir, "-dev");

    let mut dev_state = RunStateStore::load(dev.clone()).await.unwrap();
    let p = post("1", "x");
    let v = keep();
    DecisionLedger::new(dev.clone())
        .record(&mut dev_state, entry(&p, Decision::Keep, &v, DeletionOutcome::skipped()))
        .await
        .unwrap();
    dev_state.save().await.unwrap();

    assert!(dev.exists("1").await.unwrap());
    assert!(!prod.exists("1").await.unwrap());
    assert!(prod.load_state().await.unwrap().is_none());

    dev.clear_ledger().await.unwrap();
    dev.clear_state().await.unwrap();
    assert_eq!(dev.count().await.unwrap(), 0);
    assert!(dev.load_state().await.unwrap().is_none());
    assert!(repo(&dir, "-dev").recent(5).await.unwrap().is_empty());
}
