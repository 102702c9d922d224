//! Configuration for the graph store
//!
//! CLI arguments and environment variable handling using clap. The core only
//! ever sees [`StoreConfig`], so library users and tests can build one by hand.

use clap::Parser;

/// Jaseci graph store - persistence engine for Jaseci object graphs
#[derive(Parser, Debug, Clone)]
#[command(name = "jaseci-store")]
#[command(about = "Object-graph persistence engine for Jaseci graphs on MongoDB")]
pub struct Args {
    /// MongoDB connection URI
    /// When unset the embedded local store is used instead
    #[arg(long, env = "DATABASE_HOST")]
    pub database_host: Option<String>,

    /// Database name
    #[arg(long, env = "DATABASE_NAME", default_value = "jaseci")]
    pub database_name: String,

    /// Max retries of a whole transaction on TransientTransactionError
    #[arg(long, env = "SESSION_MAX_TRANSACTION_RETRY", default_value = "1")]
    pub session_max_transaction_retry: u32,

    /// Max retries of a commit on UnknownTransactionCommitResult
    #[arg(long, env = "SESSION_MAX_COMMIT_RETRY", default_value = "1")]
    pub session_max_commit_retry: u32,

    /// Keep non-root nodes that lost their last edge instead of deleting them
    #[arg(long, env = "DISABLE_AUTO_CLEANUP", default_value = "false")]
    pub disable_auto_cleanup: bool,

    /// Skip edge/endpoint prefetching during traversal
    #[arg(long, env = "SINGLE_QUERY", default_value = "false")]
    pub single_query: bool,

    /// Include walker returns in context responses
    #[arg(long, env = "SHOW_ENDPOINT_RETURNS", default_value = "false")]
    pub show_endpoint_returns: bool,

    /// NATS server URL for the walker schedule queue
    /// When unset schedules are kept in an in-process queue
    #[arg(long, env = "NATS_URL")]
    pub nats_url: Option<String>,

    /// Subject pending walker schedules are published to
    #[arg(long, env = "SCHEDULE_SUBJECT", default_value = "scheduled")]
    pub schedule_subject: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Only verify connectivity, skipping index and system root bootstrap
    #[arg(long, default_value = "false")]
    pub check: bool,
}

impl Args {
    /// Core tunables derived from the CLI/environment
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            database_name: self.database_name.clone(),
            max_transaction_retry: self.session_max_transaction_retry,
            max_commit_retry: self.session_max_commit_retry,
            auto_cleanup: !self.disable_auto_cleanup,
            single_query: self.single_query,
            show_endpoint_returns: self.show_endpoint_returns,
            schedule_subject: self.schedule_subject.clone(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.database_name.trim().is_empty() {
            return Err("DATABASE_NAME must not be empty".to_string());
        }

        if self.schedule_subject.trim().is_empty() {
            return Err("SCHEDULE_SUBJECT must not be empty".to_string());
        }

        Ok(())
    }
}

/// Tunables consumed by the memory cache and the transaction engine
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database name
    pub database_name: String,
    /// Full-transaction retry bound
    pub max_transaction_retry: u32,
    /// Commit retry bound
    pub max_commit_retry: u32,
    /// Delete non-root nodes left without edges at flush
    pub auto_cleanup: bool,
    /// Disable traversal prefetching
    pub single_query: bool,
    /// Include returns in context responses
    pub show_endpoint_returns: bool,
    /// Schedule queue subject
    pub schedule_subject: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_name: "jaseci".to_string(),
            max_transaction_retry: 1,
            max_commit_retry: 1,
            auto_cleanup: true,
            single_query: false,
            show_endpoint_returns: false,
            schedule_subject: "scheduled".to_string(),
        }
    }
}
