//! ShopGuard CLI - Main Entry Point

use clap::{Parser, Subcommand};

use shopguard_cli::client::ApiClient;
use shopguard_cli::commands::{products, reports, tests};
use shopguard_cli::output::{self, OutputFormat};

/// ShopGuard CLI - storefront regression testing
#[derive(Parser)]
#[command(name = "shopguard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Daemon address
    #[arg(
        long,
        env = "SHOPGUARD_SERVER",
        default_value = "http://127.0.0.1:5000",
        global = true
    )]
    server: String,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a test run
    Run(tests::RunArgs),

    /// Show a task's progress and step results
    Status {
        /// Task ID
        id: String,

        /// Include the raw worker log
        #[arg(long)]
        logs: bool,
    },

    /// Follow a task until it finishes
    Watch {
        /// Task ID
        id: String,
    },

    /// Stop a running task
    Stop {
        /// Task ID
        id: String,
    },

    /// List known tasks
    Tasks,

    /// List catalog products
    Products {
        /// Only this category
        #[arg(long)]
        category: Option<String>,
    },

    /// List saved reports, or show one
    Reports {
        /// Report ID
        id: Option<String>,
    },

    /// Check daemon health
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let client = ApiClient::new(&cli.server)?;
    tracing::debug!("Using daemon at {}", client.base());

    let code = match cli.command {
        Commands::Run(args) => tests::run(&client, args, cli.format).await?,
        Commands::Status { id, logs } => {
            tests::status(&client, &id, logs, cli.format).await?;
            0
        }
        Commands::Watch { id } => {
            let snapshot = tests::watch(&client, &id, cli.format).await?;
            tests::exit_code(snapshot.status)
        }
        Commands::Stop { id } => {
            tests::stop(&client, &id, cli.format).await?;
            0
        }
        Commands::Tasks => {
            tests::tasks(&client, cli.format).await?;
            0
        }
        Commands::Products { category } => {
            products::list(&client, category, cli.format).await?;
            0
        }
        Commands::Reports { id: Some(id) } => {
            reports::show(&client, &id, cli.format).await?;
            0
        }
        Commands::Reports { id: None } => {
            reports::list(&client, cli.format).await?;
            0
        }
        Commands::Health => match client.health().await {
            Ok(health) if cli.format == OutputFormat::Json => {
                output::print_json(&health);
                0
            }
            Ok(health) => {
                output::print_success(&format!("Daemon is running at {}", client.base()));
                if let Some(active) = health.get("active_task_id").and_then(|v| v.as_str()) {
                    println!("Active task: {}", active);
                }
                0
            }
            Err(e) => {
                output::print_error(&format!("Daemon is not responding: {:#}", e));
                1
            }
        },
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
