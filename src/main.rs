use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use sieve::archiver::MediaArchiver;
use sieve::classifier::{Classifier, OpenAiProvider};
use sieve::config::AppConfig;
use sieve::ledger::DecisionLedger;
use sieve::pipeline::{Pipeline, PipelineSettings, RunOptions, DEFAULT_LIMIT};
use sieve::repo::{build_repo, Repo};
use sieve::rules::RuleEngine;
use sieve::source::{PostSource, XApiClient};
use sieve::state::RunStateStore;
use sieve::storage::build_object_store;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "sieve")]
#[command(about = "Reviews old posts and deletes the ones that should not stay public")]
#[command(version)]
struct Cli {
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Review the next page of history (default)
    Run(RunArgs),
    /// Show lifetime counters and the most recent decisions
    Status {
        #[arg(long, default_value_t = 5, help = "Number of recent decisions to list")]
        recent: usize,
    },
    /// Wipe the decision ledger and run state of the active namespace
    Clear {
        #[arg(long, help = "Confirm the wipe")]
        yes: bool,
    },
    /// Check platform credentials by resolving the account
    Whoami,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, help = "Actually delete posts (default is a dry run)")]
    execute: bool,

    #[arg(long, default_value_t = DEFAULT_LIMIT, help = "Posts to fetch per run (clamped to 5..=100)")]
    limit: u32,

    #[arg(long, help = "Forget the saved cursor and start from the newest post")]
    reset_cursor: bool,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self { execute: false, limit: DEFAULT_LIMIT, reset_cursor: false }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds; production sets env externally
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let cfg = AppConfig::from_env().context("invalid configuration")?;
    let http = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;
    let source: Arc<dyn PostSource> =
        Arc::new(XApiClient::new(http.clone(), &cfg.x_api_base, &cfg.x_bearer_token));

    match cli.command.unwrap_or_else(|| Command::Run(RunArgs::default())) {
        Command::Run(args) => run(&cfg, http, source, args).await,
        Command::Status { recent } => status(&cfg, recent).await,
        Command::Clear { yes } => clear(&cfg, yes).await,
        Command::Whoami => {
            let account = source.me().await.context("authentication failed")?;
            println!("Authenticated as @{} (id {})", account.username, account.id);
            Ok(())
        }
    }
}

async fn run(cfg: &AppConfig, http: reqwest::Client, source: Arc<dyn PostSource>, args: RunArgs) -> anyhow::Result<()> {
    let repo: Arc<dyn Repo> = build_repo(cfg).await.context("persistence unavailable")?;
    let account = source.me().await.context("failed to resolve account")?;

    let provider = OpenAiProvider::new(http.clone(), &cfg.openai_api_base, &cfg.openai_api_key, &cfg.openai_model);
    let classifier = Classifier::new(Arc::new(provider), http.clone());
    let rules = RuleEngine::new(account.id.clone(), cfg.cutoff, Arc::new(classifier));

    let store = build_object_store(cfg.archive.as_ref()).await?;
    if store.is_none() {
        warn!("media archiving disabled; set R2_ACCOUNT_ID, R2_ACCESS_KEY_ID and R2_SECRET_ACCESS_KEY to enable");
    }
    let archiver = MediaArchiver::new(store, http, account.username.clone());

    let mut state = RunStateStore::load(repo.clone()).await?;
    if args.reset_cursor {
        state.reset_cursor().await?;
        info!("cursor reset; starting from the newest post");
    }

    let pipeline = Pipeline::new(
        source,
        rules,
        archiver,
        DecisionLedger::new(repo),
        account,
        PipelineSettings { min_age_days: cfg.min_age_days, delete_delay: cfg.delete_delay },
    );

    let mode = if args.execute { "EXECUTE (will delete)" } else { "DRY RUN (no deletions)" };
    info!("reviewing posts of @{} - mode: {mode}", pipeline.account().username);
    let lifetime = state.state();
    info!(
        analyzed = lifetime.total_analyzed,
        deleted = lifetime.total_deleted,
        kept = lifetime.total_kept,
        "lifetime stats so far"
    );

    let opts = RunOptions { execute: args.execute, limit: args.limit };
    let summary = pipeline.run(&mut state, &opts).await?;

    let lifetime = state.state();
    info!(
        analyzed = lifetime.total_analyzed,
        deleted = lifetime.total_deleted,
        kept = lifetime.total_kept,
        "lifetime stats"
    );
    if !args.execute && summary.marked_for_delete > 0 {
        info!("dry run complete; rerun with --execute to delete {} post(s)", summary.marked_for_delete);
    }
    Ok(())
}

async fn status(cfg: &AppConfig, recent: usize) -> anyhow::Result<()> {
    let repo = build_repo(cfg).await.context("persistence unavailable")?;
    let state = RunStateStore::load(repo.clone()).await?;
    let ledger = DecisionLedger::new(repo);
    let s = state.state();

    println!("Total analyzed: {}", s.total_analyzed);
    println!("Total deleted:  {}", s.total_deleted);
    println!("Total kept:     {}", s.total_kept);
    println!("Last run:       {}", s.last_run.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".into()));
    println!("Cursor:         {}", s.cursor.as_deref().unwrap_or("(newest)"));
    println!("Ledger records: {}", ledger.count().await?);
    println!("Failed deletes: {}", ledger.count_failed_deletes().await?);

    let records = ledger.recent(recent).await?;
    if !records.is_empty() {
        println!("\nMost recent decisions:");
    }
    for (i, r) in records.iter().enumerate() {
        let text: String = r.text.chars().take(50).collect();
        let reason: String = r.reason.chars().take(80).collect();
        println!("{}. [{}] {}", i + 1, r.decision, text);
        println!("   reason: {reason}");
        println!("   deleted: {} (attempted: {})", r.deletion.succeeded, r.deletion.attempted);
        println!("   analyzed at: {}", r.analyzed_at.to_rfc3339());
    }
    Ok(())
}

async fn clear(cfg: &AppConfig, yes: bool) -> anyhow::Result<()> {
    if !yes {
        bail!("refusing to wipe history without --yes");
    }
    let repo = build_repo(cfg).await.context("persistence unavailable")?;
    repo.clear_ledger().await?;
    repo.clear_state().await?;
    info!("ledger and run state cleared (namespace suffix '{}')", cfg.env.suffix());
    Ok(())
}
