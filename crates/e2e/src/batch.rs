//! Batch driver
//!
//! Runs scenarios one product at a time and turns the outcome into the
//! worker's exit code.

use std::io::Write;
use tracing::{error, info};

use shopguard_common::{Product, ScenarioResult, ScenarioStatus, TestMode};

use crate::browser::SessionFactory;
use crate::reporter::LineReporter;
use crate::scenario::{planned_steps, ScenarioRunner};

/// Every scenario passed
pub const EXIT_PASSED: i32 = 0;
/// At least one scenario failed or errored
pub const EXIT_FAILED: i32 = 1;
/// Nothing could be run
pub const EXIT_UNUSABLE: i32 = 2;
/// Interrupted by a signal
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
}

impl BatchSummary {
    fn record(&mut self, result: &ScenarioResult) {
        self.total += 1;
        match result.status {
            ScenarioStatus::Passed => self.passed += 1,
            ScenarioStatus::Failed => self.failed += 1,
            ScenarioStatus::Error => self.errored += 1,
        }
    }

    pub fn exit_code(&self) -> i32 {
        if self.total == 0 || self.errored == self.total {
            EXIT_UNUSABLE
        } else if self.failed + self.errored > 0 {
            EXIT_FAILED
        } else {
            EXIT_PASSED
        }
    }
}

/// Run every product in order. A browser that fails to start only costs
/// the product it was opened for.
pub async fn run_batch<F, W>(
    runner: &ScenarioRunner<F>,
    products: &[Product],
    mode: TestMode,
    reporter: &mut LineReporter<W>,
) -> BatchSummary
where
    F: SessionFactory,
    W: Write + Send,
{
    let total = products.len();
    let mut summary = BatchSummary::default();
    reporter.batch_started(total);

    for (i, product) in products.iter().enumerate() {
        let index = i + 1;
        info!("[{}/{}] Testing {} ({})", index, total, product.name, product.id);
        reporter.scenario_started(index, total, product, mode);

        let result = match runner.run(product, mode, reporter).await {
            Ok(result) => result,
            Err(e) => {
                error!("Could not start a browser for {}: {}", product.id, e);
                ScenarioResult::new(
                    &product.id,
                    &product.name,
                    mode,
                    planned_steps(mode),
                    vec![e.to_string()],
                    0.0,
                )
            }
        };

        reporter.scenario_finished(index, total, &result);
        summary.record(&result);
    }

    info!(
        "Batch finished: {} passed, {} failed, {} errors",
        summary.passed, summary.failed, summary.errored
    );
    summary
}
