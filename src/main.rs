//! Jaseci graph store - bootstrap and connectivity check
//!
//! Connects the configured backends, applies the anchor collection indexes
//! and makes sure the system root exists.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jaseci_store::{
    config::Args,
    db::DocumentStore,
    graph::{system_root_id, ArchetypeRegistry, GraphStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("jaseci_store={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Jaseci Graph Store");
    info!("======================================");
    info!("Database: {}", args.database_host.as_deref().unwrap_or("embedded local store"));
    info!("Database name: {}", args.database_name);
    info!(
        "Retries: transaction={} commit={}",
        args.session_max_transaction_retry, args.session_max_commit_retry
    );
    info!("Auto cleanup: {}", !args.disable_auto_cleanup);
    info!("Single query: {}", args.single_query);
    info!("Schedule queue: {}", args.nats_url.as_deref().unwrap_or("in-process"));
    info!("======================================");

    let graph = match GraphStore::connect(&args, ArchetypeRegistry::new()).await {
        Ok(graph) => graph,
        Err(e) => {
            error!("Failed to connect backends: {}", e);
            std::process::exit(1);
        }
    };

    graph.store().ping().await?;
    info!("{} store reachable", graph.store().backend());

    if args.check {
        info!("Connectivity check passed");
        return Ok(());
    }

    graph.apply_indexes().await?;
    graph.ensure_system_root().await?;
    info!("System root: n::{}", system_root_id().to_hex());
    info!("Bootstrap complete");

    Ok(())
}
