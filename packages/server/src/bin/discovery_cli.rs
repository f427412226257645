//! Operator CLI for discovery jobs.
//!
//! ```text
//! discovery_cli enqueue cats --limit 10 --requested-by ops
//! discovery_cli show 0190f0c4-...
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use discovery_core::common::DiscoveryJobId;
use discovery_core::domains::discovery::{enqueue_discovery, EnqueueDiscoveryInput};
use discovery_core::kernel::{connect_optional, BaseDiscoveryStore, ServerDeps};
use discovery_core::Config;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "discovery_cli")]
#[command(about = "Enqueue and inspect hashtag discovery jobs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create (or re-arm) a discovery job and queue it
    Enqueue {
        /// Hashtag to crawl, with or without the leading '#'
        hashtag: String,

        /// Number of creators to process
        #[arg(short, long)]
        limit: Option<i32>,

        /// Re-use an existing discovery id
        #[arg(long)]
        discovery_id: Option<DiscoveryJobId>,

        #[arg(long)]
        requested_by: Option<String>,
    },

    /// Print a discovery record as JSON
    Show {
        discovery_id: DiscoveryJobId,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,discovery_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    let nats = connect_optional(config.nats_url.as_deref()).await;
    let deps = ServerDeps::from_pool(pool.clone(), &config, nats);

    match cli.command {
        Commands::Enqueue {
            hashtag,
            limit,
            discovery_id,
            requested_by,
        } => {
            let input = EnqueueDiscoveryInput {
                hashtag,
                limit,
                discovery_id,
                requested_by,
                metadata: Some(serde_json::json!({ "via": "discovery_cli" })),
            };
            let result = enqueue_discovery(input, &deps).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Show { discovery_id } => {
            let job = deps
                .discovery_store
                .find(discovery_id)
                .await?
                .with_context(|| format!("Discovery {} not found", discovery_id))?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
    }

    pool.close().await;
    Ok(())
}
