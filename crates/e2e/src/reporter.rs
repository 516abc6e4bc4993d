//! Progress output
//!
//! The worker's stdout is read line by line by the supervisor, so every
//! structured event goes through [`shopguard_common::protocol`].

use std::io::Write;
use tracing::warn;

use shopguard_common::protocol;
use shopguard_common::{Product, ScenarioResult, Step, TestMode};

/// Receives step transitions as they happen
pub trait ProgressSink: Send {
    fn step_started(&mut self, step: &Step);
    fn step_finished(&mut self, step: &Step);
}

/// Writes protocol lines to any writer, flushing after each line
pub struct LineReporter<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> LineReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, line: &str) {
        let result = writeln!(self.out, "{}", line).and_then(|_| self.out.flush());
        if let Err(e) = result {
            warn!("Failed to write progress line: {}", e);
        }
    }

    pub fn batch_started(&mut self, total: usize) {
        self.emit(&protocol::batch_started(total));
    }

    pub fn scenario_started(&mut self, index: usize, total: usize, product: &Product, mode: TestMode) {
        self.emit(&protocol::scenario_start(index, total, &product.name));
        self.emit(&protocol::product_id(&product.id));
        self.emit(&protocol::test_mode(mode));
    }

    pub fn scenario_finished(&mut self, index: usize, total: usize, result: &ScenarioResult) {
        for error in &result.errors {
            self.emit(&protocol::scenario_error(error));
        }
        self.emit(&protocol::scenario_finished(result.status, result.duration));
        self.emit(&protocol::progress(
            index,
            total,
            &result.product_name,
            result.status,
            result.duration,
        ));
    }

    /// Free-form line, ignored by the parser
    pub fn note(&mut self, text: &str) {
        self.emit(&protocol::flatten(text));
    }
}

impl<W: Write + Send> ProgressSink for LineReporter<W> {
    fn step_started(&mut self, step: &Step) {
        self.emit(&protocol::step_start(step.number, &step.name));
        if !step.description.is_empty() {
            self.emit(&protocol::description(&step.description));
        }
    }

    fn step_finished(&mut self, step: &Step) {
        for line in protocol::completed_step(step) {
            self.emit(&line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopguard_common::StepStatus;

    #[test]
    fn test_step_lines() {
        let mut reporter = LineReporter::new(Vec::new());
        let mut step = Step::new(4, "Cart verification", "check the cart");
        step.start().unwrap();
        reporter.step_started(&step);
        step.complete(StepStatus::Passed, "Cart updated, count: 1", None, None)
            .unwrap();
        reporter.step_finished(&step);

        let out = String::from_utf8(reporter.into_inner()).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines[0], "[Step 4] Cart verification");
        assert_eq!(lines[1], "  Description: check the cart");
        assert!(lines[2].starts_with("  ✓ Result: Cart updated, count: 1 (took "));
        assert_eq!(lines.len(), 3);
    }
}
