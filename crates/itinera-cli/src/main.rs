mod config;
mod credits_cmd;
mod serve_cmd;
mod status_cmd;
mod submit_cmd;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use itinera_core::breaker::CircuitBreaker;
use itinera_core::coordinator::{CoordinatorConfig, PlanCoordinator};
use itinera_core::workflow::HttpWorkflowClient;
use itinera_db::pool;

use config::ItineraConfig;

#[derive(Parser)]
#[command(name = "itinera", about = "Travel itinerary generation service")]
struct Cli {
    /// Database URL (overrides ITINERA_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write an itinera config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/itinera")]
        db_url: String,
        /// Base URL of the AI workflow API
        #[arg(long, default_value = "")]
        workflow_url: String,
        /// Identifier of the itinerary-generation workflow
        #[arg(long, default_value = "")]
        workflow_id: String,
        /// Bearer token for the workflow API
        #[arg(long, default_value = "")]
        workflow_token: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the itinera database (create + migrate)
    DbInit,
    /// Run the HTTP API server
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Submit a plan request and wait for the outcome
    Submit {
        /// Owner (user) identifier
        #[arg(long)]
        owner: String,
        /// Trip origin
        origin: String,
        /// Trip destination
        destination: String,
        /// Travel date (YYYY-MM-DD)
        date: String,
        /// Number of days
        #[arg(long, default_value_t = 3)]
        days: i32,
        /// Preference tag (repeatable; empty means "no preference")
        #[arg(long = "prefer")]
        preferences: Vec<String>,
    },
    /// Show plan request status (omit plan_id to list all)
    Status {
        /// Plan ID to show (omit to list all)
        plan_id: Option<String>,
    },
    /// Credit balance and ledger management
    Credits {
        #[command(subcommand)]
        command: CreditsCommands,
    },
}

#[derive(Subcommand)]
pub enum CreditsCommands {
    /// Show an owner's balance, reconciled against the ledger
    Show {
        /// Owner identifier
        owner: String,
    },
    /// Grant credits to an owner (records a purchase)
    Grant {
        /// Owner identifier
        owner: String,
        /// Credits to grant
        amount: i64,
        /// Ledger remark
        #[arg(long, default_value = "operator grant")]
        remark: String,
    },
    /// Show an owner's transaction history
    History {
        /// Owner identifier
        owner: String,
    },
}

/// Execute the `itinera init` command: write config file.
fn cmd_init(
    db_url: &str,
    workflow_url: &str,
    workflow_id: &str,
    workflow_token: &str,
    force: bool,
) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let api_key = config::generate_api_key();

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        workflow: config::WorkflowSection {
            base_url: workflow_url.to_string(),
            workflow_id: workflow_id.to_string(),
            api_token: workflow_token.to_string(),
        },
        server: config::ServerSection {
            api_key: api_key.clone(),
        },
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!(
        "  server.api_key = {}...{}",
        &api_key[..8],
        &api_key[56..]
    );
    if workflow_url.is_empty() {
        println!();
        println!("The [workflow] section is empty; fill in base_url, workflow_id and");
        println!("api_token before running `itinera serve` or `itinera submit`.");
    }
    println!();
    println!("Next: run `itinera db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `itinera db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let db_config = config::resolve_db(cli_db_url);

    println!("Initializing itinera database...");

    // 1. Create the database if it does not exist.
    pool::ensure_database_exists(&db_config).await?;

    // 2. Connect to the target database.
    let db_pool = pool::create_pool(&db_config).await?;

    // 3. Run migrations.
    pool::run_migrations(&db_pool).await?;

    // 4. Print success with table counts.
    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    // 5. Clean shutdown.
    db_pool.close().await;

    println!("itinera db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            db_url,
            workflow_url,
            workflow_id,
            workflow_token,
            force,
        } => {
            cmd_init(&db_url, &workflow_url, &workflow_id, &workflow_token, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Serve { bind, port } => {
            let resolved = ItineraConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;

            let workflow = HttpWorkflowClient::new(resolved.workflow)?;
            let coordinator = Arc::new(PlanCoordinator::new(
                db_pool.clone(),
                Arc::new(workflow),
                Arc::new(CircuitBreaker::default()),
                CoordinatorConfig::default(),
            ));
            let state = serve_cmd::AppState {
                pool: db_pool.clone(),
                coordinator,
                api_key: resolved.api_key,
            };

            let result = serve_cmd::run_serve(state, &bind, port).await;
            db_pool.close().await;
            result?;
        }
        Commands::Submit {
            owner,
            origin,
            destination,
            date,
            days,
            preferences,
        } => {
            let resolved = ItineraConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = submit_cmd::run_submit(
                &db_pool,
                resolved.workflow,
                &owner,
                &origin,
                &destination,
                &date,
                days,
                preferences,
            )
            .await;
            db_pool.close().await;
            result?;
        }
        Commands::Status { plan_id } => {
            let db_config = config::resolve_db(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&db_config).await?;
            let result = status_cmd::run_status(&db_pool, plan_id.as_deref()).await;
            db_pool.close().await;
            result?;
        }
        Commands::Credits { command } => {
            let db_config = config::resolve_db(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&db_config).await?;
            let result = credits_cmd::run_credits_command(command, &db_pool).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
