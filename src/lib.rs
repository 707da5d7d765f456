pub mod archiver;
pub mod classifier;
pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod pipeline;
pub mod repo;
pub mod rules;
pub mod source;
pub mod state;
pub mod storage; // archive backend

// Re-export commonly used items for tests / external users
pub use config::AppConfig;
pub use pipeline::{Pipeline, PipelineSettings, RunOptions, RunSummary};
