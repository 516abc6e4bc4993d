//! Worker output line protocol
//!
//! The worker reports progress as plain text lines on stdout and the
//! supervisor decodes them back into structured state. Every line the worker
//! prints for a structured event is produced here, and the daemon's parser
//! matches exactly these shapes, so both sides change together.

use crate::types::{IssueDetails, ScenarioStatus, Step, StepStatus, TestMode};

/// Indent of issue field lines
pub const ISSUE_FIELD_INDENT: &str = "     ";
/// Indent of root-cause continuation lines
pub const CONTINUATION_INDENT: &str = "        ";
pub const ISSUE_HEADER: &str = "  Issue details:";

/// Labelled fields inside an issue block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueField {
    Scenario,
    Operation,
    Problem,
    RootCause,
    ScriptError,
}

impl IssueField {
    pub fn label(&self) -> &'static str {
        match self {
            IssueField::Scenario => "Scenario",
            IssueField::Operation => "Operation",
            IssueField::Problem => "Problem",
            IssueField::RootCause => "Root cause",
            IssueField::ScriptError => "Script error",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Scenario" => Some(IssueField::Scenario),
            "Operation" => Some(IssueField::Operation),
            "Problem" => Some(IssueField::Problem),
            "Root cause" => Some(IssueField::RootCause),
            "Script error" => Some(IssueField::ScriptError),
            _ => None,
        }
    }
}

/// Status glyph for a terminal step
pub fn glyph(status: StepStatus) -> char {
    match status {
        StepStatus::Passed => '✓',
        StepStatus::Failed => '✗',
        StepStatus::Skipped => '⊘',
        // never printed on a result line
        StepStatus::Pending | StepStatus::Running => '·',
    }
}

pub fn status_from_glyph(glyph: char) -> Option<StepStatus> {
    match glyph {
        '✓' => Some(StepStatus::Passed),
        '✗' => Some(StepStatus::Failed),
        '⊘' => Some(StepStatus::Skipped),
        _ => None,
    }
}

/// Collapse line breaks so free text stays on one protocol line
pub fn flatten(text: &str) -> String {
    text.split(['\r', '\n'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn batch_started(total: usize) -> String {
    format!("Batch started: {} products", total)
}

pub fn scenario_start(index: usize, total: usize, name: &str) -> String {
    format!("[{}/{}] Testing product: {}", index, total, flatten(name))
}

pub fn product_id(id: &str) -> String {
    format!("Product ID: {}", flatten(id))
}

pub fn test_mode(mode: TestMode) -> String {
    format!("Test mode: {}", mode)
}

pub fn step_start(number: u32, name: &str) -> String {
    format!("[Step {}] {}", number, flatten(name))
}

pub fn description(text: &str) -> String {
    format!("  Description: {}", flatten(text))
}

pub fn error(text: &str) -> String {
    format!("  Error: {}", flatten(text))
}

pub fn issue_field(field: IssueField, text: &str) -> String {
    format!("{}{}: {}", ISSUE_FIELD_INDENT, field.label(), flatten(text))
}

/// Issue block: header, fields, root-cause continuation, script errors
pub fn issue_block(issue: &IssueDetails) -> Vec<String> {
    let mut lines = vec![
        ISSUE_HEADER.to_string(),
        issue_field(IssueField::Scenario, &issue.scenario),
        issue_field(IssueField::Operation, &issue.operation),
        issue_field(IssueField::Problem, &issue.problem),
    ];

    let mut cause = issue
        .root_cause
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty());
    lines.push(issue_field(IssueField::RootCause, cause.next().unwrap_or("")));
    lines.extend(cause.map(|l| format!("{}{}", CONTINUATION_INDENT, l)));

    lines.extend(
        issue
            .js_errors
            .iter()
            .map(|e| issue_field(IssueField::ScriptError, e)),
    );
    lines
}

pub fn result(status: StepStatus, message: &str, duration: Option<f64>) -> String {
    match duration {
        Some(secs) => format!(
            "  {} Result: {} (took {:.2}s)",
            glyph(status),
            flatten(message),
            secs
        ),
        None => format!("  {} Result: {}", glyph(status), flatten(message)),
    }
}

/// Lines for a step that just reached a terminal state.
/// The result line is always last.
pub fn completed_step(step: &Step) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(err) = &step.error {
        lines.push(error(err));
    }
    if let Some(issue) = &step.issue_details {
        lines.extend(issue_block(issue));
    }
    lines.push(result(step.status, &step.message, step.duration));
    lines
}

pub fn scenario_error(text: &str) -> String {
    format!("Scenario error: {}", flatten(text))
}

pub fn scenario_finished(status: ScenarioStatus, duration: f64) -> String {
    format!("Scenario finished: {} (took {:.2}s)", status.marker(), duration)
}

pub fn progress(
    index: usize,
    total: usize,
    name: &str,
    status: ScenarioStatus,
    duration: f64,
) -> String {
    format!(
        "[{}/{}] {} - {} ({:.2}s)",
        index,
        total,
        flatten(name),
        status.marker(),
        duration
    )
}
