use std::sync::Arc;

use async_trait::async_trait;

use crate::config::AppConfig;
use crate::error::StoreError;
use crate::models::{DecisionRecord, RunState};

pub type StoreResult<T> = Result<T, StoreError>;

/// Append-only decision history keyed by post id.
#[async_trait]
pub trait LedgerRepo: Send + Sync {
    async fn exists(&self, post_id: &str) -> StoreResult<bool>;
    /// Fails with `StoreError::Duplicate` if the post already has a record.
    async fn insert(&self, record: &DecisionRecord) -> StoreResult<()>;
    /// Newest first by `analyzed_at`.
    async fn recent(&self, limit: usize) -> StoreResult<Vec<DecisionRecord>>;
    async fn count(&self) -> StoreResult<u64>;
    async fn count_failed_deletes(&self) -> StoreResult<u64>;
    async fn clear_ledger(&self) -> StoreResult<()>;
}

/// Singleton run-state document.
#[async_trait]
pub trait StateRepo: Send + Sync {
    async fn load_state(&self) -> StoreResult<Option<RunState>>;
    /// Replaces the stored document wholesale.
    async fn upsert_state(&self, state: &RunState) -> StoreResult<()>;
    async fn clear_state(&self) -> StoreResult<()>;
}

pub trait Repo: LedgerRepo + StateRepo {}

impl<T> Repo for T where T: LedgerRepo + StateRepo {}

/// Postgres when `DATABASE_URL` is set, otherwise JSON files under the data dir.
pub async fn build_repo(cfg: &AppConfig) -> StoreResult<Arc<dyn Repo>> {
    let suffix = cfg.env.suffix();
    match &cfg.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(2)
                .acquire_timeout(std::time::Duration::from_secs(10))
                .connect(url)
                .await?;
            let repo = pg::PgRepo::new(pool, format!("sieve{suffix}"));
            repo.migrate().await?;
            tracing::info!("Using Postgres store (namespace sieve{suffix})");
            let repo: Arc<dyn Repo> = Arc::new(repo);
            Ok(repo)
        }
        None => {
            let repo = file::FileRepo::open(&cfg.data_dir, suffix)?;
            tracing::info!("Using file store at '{}'", cfg.data_dir.display());
            let repo: Arc<dyn Repo> = Arc::new(repo);
            Ok(repo)
        }
    }
}

pub mod file {
    use super::*;
    use std::collections::HashSet;
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Seek, SeekFrom, Write};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Ledger {
        index: HashSet<String>,
        records: Vec<DecisionRecord>,
    }

    /// `state{suffix}.json` holds the run state, `decisions{suffix}.jsonl` one
    /// record per line.
    pub struct FileRepo {
        state_path: PathBuf,
        ledger_path: PathBuf,
        ledger: Mutex<Ledger>,
    }

    impl FileRepo {
        pub fn open(data_dir: &Path, suffix: &str) -> StoreResult<Self> {
            fs::create_dir_all(data_dir)?;
            let state_path = data_dir.join(format!("state{suffix}.json"));
            let ledger_path = data_dir.join(format!("decisions{suffix}.jsonl"));
            let ledger = Self::read_ledger(&ledger_path)?;
            log::debug!("Loaded {} ledger records from '{}'", ledger.records.len(), ledger_path.display());
            Ok(Self { state_path, ledger_path, ledger: Mutex::new(ledger) })
        }

        fn read_ledger(path: &Path) -> StoreResult<Ledger> {
            let raw = match fs::read(path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Ledger::default()),
                Err(e) => return Err(e.into()),
            };
            let lines: Vec<&[u8]> = raw
                .split_inclusive(|b| *b == b'\n')
                .filter(|l| !l.iter().all(u8::is_ascii_whitespace))
                .collect();
            let mut ledger = Ledger::default();
            // byte length of the intact prefix
            let mut good_len = 0;
            for (i, line) in lines.iter().enumerate() {
                match serde_json::from_slice::<DecisionRecord>(line) {
                    Ok(rec) => {
                        ledger.index.insert(rec.post_id.clone());
                        ledger.records.push(rec);
                        good_len = line.as_ptr() as usize - raw.as_ptr() as usize + line.len();
                    }
                    // a crash mid-append can only tear the last line
                    Err(e) if i + 1 == lines.len() => {
                        log::warn!("Dropping torn trailing ledger line in '{}': {e}", path.display());
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            if good_len < raw.len() || raw.last().is_some_and(|b| *b != b'\n') {
                Self::repair_tail(path, &raw[..good_len])?;
            }
            Ok(ledger)
        }

        /// Cut the file back to its intact prefix and make sure it ends on a
        /// line boundary, so the next append starts a fresh line.
        fn repair_tail(path: &Path, intact: &[u8]) -> StoreResult<()> {
            let mut f = OpenOptions::new().write(true).open(path)?;
            f.set_len(intact.len() as u64)?;
            if intact.last().is_some_and(|b| *b != b'\n') {
                f.seek(SeekFrom::End(0))?;
                f.write_all(b"\n")?;
            }
            f.sync_data()?;
            Ok(())
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Ledger> {
            self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
        }
    }

    #[async_trait]
    impl LedgerRepo for FileRepo {
        async fn exists(&self, post_id: &str) -> StoreResult<bool> {
            Ok(self.lock().index.contains(post_id))
        }

        async fn insert(&self, record: &DecisionRecord) -> StoreResult<()> {
            let mut ledger = self.lock();
            if ledger.index.contains(&record.post_id) {
                return Err(StoreError::Duplicate(record.post_id.clone()));
            }
            let mut line = serde_json::to_vec(record)?;
            line.push(b'\n');
            let mut f = OpenOptions::new().create(true).append(true).open(&self.ledger_path)?;
            f.write_all(&line)?;
            f.sync_data()?;
            ledger.index.insert(record.post_id.clone());
            ledger.records.push(record.clone());
            Ok(())
        }

        async fn recent(&self, limit: usize) -> StoreResult<Vec<DecisionRecord>> {
            let mut all = self.lock().records.clone();
            all.sort_by(|a, b| b.analyzed_at.cmp(&a.analyzed_at));
            all.truncate(limit);
            Ok(all)
        }

        async fn count(&self) -> StoreResult<u64> {
            Ok(self.lock().records.len() as u64)
        }

        async fn count_failed_deletes(&self) -> StoreResult<u64> {
            let ledger = self.lock();
            Ok(ledger.records.iter().filter(|r| r.deletion.attempted && !r.deletion.succeeded).count() as u64)
        }

        async fn clear_ledger(&self) -> StoreResult<()> {
            let mut ledger = self.lock();
            match fs::remove_file(&self.ledger_path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            *ledger = Ledger::default();
            Ok(())
        }
    }

    #[async_trait]
    impl StateRepo for FileRepo {
        async fn load_state(&self) -> StoreResult<Option<RunState>> {
            match fs::read(&self.state_path) {
                Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        }

        async fn upsert_state(&self, state: &RunState) -> StoreResult<()> {
            // write-then-rename so readers never see a half-written document
            let tmp = self.state_path.with_extension("json.tmp");
            {
                let mut f = fs::File::create(&tmp)?;
                f.write_all(&serde_json::to_vec_pretty(state)?)?;
                f.sync_all()?;
            }
            fs::rename(&tmp, &self.state_path)?;
            Ok(())
        }

        async fn clear_state(&self) -> StoreResult<()> {
            match fs::remove_file(&self.state_path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
    }
}

pub mod pg {
    use super::*;
    use sqlx::types::Json;
    use sqlx::{Pool, Postgres};

    #[derive(Clone)]
    pub struct PgRepo {
        pool: Pool<Postgres>,
        namespace: String,
    }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>, namespace: impl Into<String>) -> Self {
            Self { pool, namespace: namespace.into() }
        }

        pub async fn migrate(&self) -> StoreResult<()> {
            sqlx::migrate!("./migrations").run(&self.pool).await?;
            Ok(())
        }
    }

    #[async_trait]
    impl LedgerRepo for PgRepo {
        async fn exists(&self, post_id: &str) -> StoreResult<bool> {
            let found = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM decisions WHERE namespace = $1 AND post_id = $2)",
            )
            .bind(&self.namespace)
            .bind(post_id)
            .fetch_one(&self.pool)
            .await?;
            Ok(found)
        }

        async fn insert(&self, record: &DecisionRecord) -> StoreResult<()> {
            let res = sqlx::query(
                "INSERT INTO decisions (namespace, post_id, record, analyzed_at) VALUES ($1, $2, $3, $4)",
            )
            .bind(&self.namespace)
            .bind(&record.post_id)
            .bind(Json(record))
            .bind(record.analyzed_at)
            .execute(&self.pool)
            .await;
            match res {
                Ok(_) => Ok(()),
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    Err(StoreError::Duplicate(record.post_id.clone()))
                }
                Err(e) => Err(e.into()),
            }
        }

        async fn recent(&self, limit: usize) -> StoreResult<Vec<DecisionRecord>> {
            let rows = sqlx::query_scalar::<_, Json<DecisionRecord>>(
                "SELECT record FROM decisions WHERE namespace = $1 ORDER BY analyzed_at DESC LIMIT $2",
            )
            .bind(&self.namespace)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(|Json(r)| r).collect())
        }

        async fn count(&self) -> StoreResult<u64> {
            let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM decisions WHERE namespace = $1")
                .bind(&self.namespace)
                .fetch_one(&self.pool)
                .await?;
            Ok(n.max(0) as u64)
        }

        async fn count_failed_deletes(&self) -> StoreResult<u64> {
            let n = sqlx::query_scalar::<_, i64>(
                r#"SELECT COUNT(*) FROM decisions
                   WHERE namespace = $1
                     AND (record->'deletion'->>'attempted')::boolean
                     AND NOT (record->'deletion'->>'succeeded')::boolean"#,
            )
            .bind(&self.namespace)
            .fetch_one(&self.pool)
            .await?;
            Ok(n.max(0) as u64)
        }

        async fn clear_ledger(&self) -> StoreResult<()> {
            sqlx::query("DELETE FROM decisions WHERE namespace = $1")
                .bind(&self.namespace)
                .execute(&self.pool)
                .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl StateRepo for PgRepo {
        async fn load_state(&self) -> StoreResult<Option<RunState>> {
            let doc = sqlx::query_scalar::<_, Json<RunState>>("SELECT doc FROM run_state WHERE namespace = $1")
                .bind(&self.namespace)
                .fetch_optional(&self.pool)
                .await?;
            Ok(doc.map(|Json(s)| s))
        }

        async fn upsert_state(&self, state: &RunState) -> StoreResult<()> {
            sqlx::query(
                r#"INSERT INTO run_state (namespace, doc, updated_at) VALUES ($1, $2, now())
                   ON CONFLICT (namespace) DO UPDATE SET doc = EXCLUDED.doc, updated_at = now()"#,
            )
            .bind(&self.namespace)
            .bind(Json(state))
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn clear_state(&self) -> StoreResult<()> {
            sqlx::query("DELETE FROM run_state WHERE namespace = $1")
                .bind(&self.namespace)
                .execute(&self.pool)
                .await?;
            Ok(())
        }
    }
}
