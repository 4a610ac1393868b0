//! Maintenance tool
//!
//! Run with: cargo run --bin ticketctl -- expire-reservations 900 --live
//!
//! Without an operation name the available operations are listed. Without
//! `--live` the operation runs and is rolled back.

use clap::Parser;
use ticket_settlement::db;
use ticket_settlement::maintenance::OperationRegistry;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ticketctl")]
#[command(about = "Run maintenance operations against the ticket database", long_about = None)]
struct Args {
    /// Operation to run; lists operations when omitted
    operation: Option<String>,

    /// Arguments passed to the operation
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,

    /// Commit the operation's transaction instead of rolling it back
    #[arg(long)]
    live: bool,

    /// Overrides DATABASE_URL
    #[arg(long, value_name = "URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ticket_settlement=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let registry = OperationRegistry::with_defaults();

    let Some(name) = args.operation else {
        println!("Available operations:");
        for (name, description) in registry.list() {
            println!("  {:<22} {}", name, description);
        }
        return Ok(());
    };

    if registry.get(&name).is_none() {
        anyhow::bail!("unknown operation '{}', run without arguments to list", name);
    }

    let database_url = match args.database_url {
        Some(url) => url,
        None => std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is not set"))?,
    };
    let pool = db::connect(&database_url, 2).await?;

    let summary = registry.run(&pool, &name, &args.args, args.live).await?;

    let mode = if args.live { "committed" } else { "dry run, rolled back" };
    println!("{}: {} ({})", name, summary, mode);

    pool.close().await;
    Ok(())
}
