//! shopguard-worker: runs storefront scenarios and reports progress on stdout
//!
//! Exit codes: 0 all passed, 1 any failure, 2 nothing could run,
//! 130 interrupted.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shopguard_common::{
    default_catalog_path, Catalog, DisabledCheckoutPolicy, TestMode, TestScope,
};
use shopguard_e2e::batch::{run_batch, EXIT_INTERRUPTED, EXIT_UNUSABLE};
use shopguard_e2e::playwright::{PlaywrightConfig, PlaywrightFactory};
use shopguard_e2e::reporter::LineReporter;
use shopguard_e2e::scenario::{ScenarioOptions, ScenarioRunner};

#[derive(Parser, Debug)]
#[command(name = "shopguard-worker", version)]
#[command(about = "Run storefront purchase-flow scenarios")]
struct Args {
    /// Product catalog (JSON)
    #[arg(long, env = "SHOPGUARD_CATALOG")]
    catalog: Option<PathBuf>,

    /// Test a single product
    #[arg(long, conflicts_with_all = ["product_ids", "category", "all"])]
    product_id: Option<String>,

    /// Test a comma-separated list of products
    #[arg(long, value_delimiter = ',', conflicts_with_all = ["category", "all"])]
    product_ids: Vec<String>,

    /// Test every product in a category
    #[arg(long, conflicts_with = "all")]
    category: Option<String>,

    /// Test products across all categories
    #[arg(long)]
    all: bool,

    /// Maximum number of products for category and all runs
    #[arg(long)]
    limit: Option<usize>,

    /// quick or full
    #[arg(long, default_value = "quick")]
    mode: TestMode,

    /// Run the browser headless (default)
    #[arg(long, overrides_with = "visible")]
    headless: bool,

    /// Show the browser window
    #[arg(long, overrides_with = "headless")]
    visible: bool,

    /// Cart page URL; derived from each product URL when unset
    #[arg(long)]
    cart_url: Option<String>,

    /// What a disabled checkout button means: fail or skip
    #[arg(long, default_value = "fail")]
    disabled_checkout: DisabledCheckoutPolicy,

    /// Directory containing node_modules/playwright
    #[arg(long, env = "SHOPGUARD_DRIVER_DIR")]
    driver_dir: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn scope(&self) -> anyhow::Result<TestScope> {
        if let Some(id) = &self.product_id {
            return Ok(TestScope::Product {
                product_id: id.clone(),
            });
        }
        if !self.product_ids.is_empty() {
            return Ok(TestScope::Products {
                product_ids: self.product_ids.clone(),
            });
        }
        if let Some(category) = &self.category {
            return Ok(TestScope::Category {
                category: category.clone(),
            });
        }
        if self.all {
            return Ok(TestScope::All);
        }
        bail!("one of --product-id, --product-ids, --category or --all is required")
    }
}

fn main() {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the progress lines
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    let code = match tokio::runtime::Runtime::new() {
        Ok(rt) => match rt.block_on(async_main(args)) {
            Ok(code) => code,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                EXIT_UNUSABLE
            }
        },
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            EXIT_UNUSABLE
        }
    };
    std::process::exit(code);
}

async fn async_main(args: Args) -> anyhow::Result<i32> {
    let scope = args.scope()?;
    let catalog_path = args.catalog.clone().unwrap_or_else(default_catalog_path);
    let catalog = Catalog::load(&catalog_path)
        .with_context(|| format!("loading catalog {}", catalog_path.display()))?;
    let selection = catalog.select(&scope, args.limit)?;

    let mut reporter = LineReporter::new(std::io::stdout());
    for id in &selection.missing {
        warn!("Product {} is not in the catalog, skipping", id);
        reporter.note(&format!("Product {} not found in catalog, skipped", id));
    }
    if selection.products.is_empty() {
        bail!("no products selected for {}", scope.describe());
    }

    let factory = PlaywrightFactory::new(PlaywrightConfig {
        driver_dir: args.driver_dir.clone(),
        headless: args.headless || !args.visible,
        ..PlaywrightConfig::default()
    });
    let runner = ScenarioRunner::new(
        factory,
        ScenarioOptions {
            cart_url: args.cart_url.clone(),
            disabled_checkout: args.disabled_checkout,
        },
    );

    info!(
        "Testing {} ({} products, {} mode)",
        scope.describe(),
        selection.products.len(),
        args.mode
    );

    let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let summary = tokio::select! {
        summary = run_batch(&runner, &selection.products, args.mode, &mut reporter) => summary,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, closing browser");
            return Ok(EXIT_INTERRUPTED);
        }
        _ = terminate.recv() => {
            warn!("Terminated, closing browser");
            return Ok(EXIT_INTERRUPTED);
        }
    };

    reporter.note(&format!(
        "Summary: {} passed, {} failed, {} errors",
        summary.passed, summary.failed, summary.errored
    ));
    Ok(summary.exit_code())
}
