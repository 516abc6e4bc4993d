//! Core types for ShopGuard

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Scenario depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestMode {
    /// Core purchase path, 5 steps
    Quick,
    /// Full page and checkout coverage, 12 steps
    Full,
}

impl Default for TestMode {
    fn default() -> Self {
        Self::Quick
    }
}

impl std::fmt::Display for TestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestMode::Quick => write!(f, "quick"),
            TestMode::Full => write!(f, "full"),
        }
    }
}

impl FromStr for TestMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(TestMode::Quick),
            "full" => Ok(TestMode::Full),
            other => Err(format!("unknown test mode '{}' (expected quick or full)", other)),
        }
    }
}

/// How a present-but-disabled checkout button is judged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisabledCheckoutPolicy {
    /// Report the step as failed
    Fail,
    /// Treat it as a store rule such as a minimum order value
    Skip,
}

impl Default for DisabledCheckoutPolicy {
    fn default() -> Self {
        Self::Fail
    }
}

impl std::fmt::Display for DisabledCheckoutPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisabledCheckoutPolicy::Fail => write!(f, "fail"),
            DisabledCheckoutPolicy::Skip => write!(f, "skip"),
        }
    }
}

impl FromStr for DisabledCheckoutPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(DisabledCheckoutPolicy::Fail),
            "skip" => Ok(DisabledCheckoutPolicy::Skip),
            other => Err(format!("unknown checkout policy '{}' (expected fail or skip)", other)),
        }
    }
}

// ============================================================================
// Steps
// ============================================================================

/// Step state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Skipped,
}

impl Default for StepStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Passed | StepStatus::Failed | StepStatus::Skipped)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Running => write!(f, "running"),
            StepStatus::Passed => write!(f, "passed"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Diagnosis attached to a failed step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueDetails {
    /// What the shopper was doing
    pub scenario: String,
    /// What the test did
    pub operation: String,
    /// What went wrong
    pub problem: String,
    /// Probable cause, as produced by the issue classifier
    pub root_cause: String,
    /// Captured script errors, oldest first
    #[serde(default)]
    pub js_errors: Vec<String>,
}

/// One verifiable unit of a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub number: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default)]
    pub message: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Seconds between start and completion
    pub duration: Option<f64>,
    pub error: Option<String>,
    pub issue_details: Option<IssueDetails>,
}

impl Step {
    pub fn new(number: u32, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            number,
            name: name.into(),
            description: description.into(),
            status: StepStatus::Pending,
            message: String::new(),
            started_at: None,
            completed_at: None,
            duration: None,
            error: None,
            issue_details: None,
        }
    }

    /// pending -> running
    pub fn start(&mut self) -> Result<()> {
        if self.status != StepStatus::Pending {
            return Err(Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: StepStatus::Running.to_string(),
            });
        }
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// running -> passed | failed | skipped
    pub fn complete(
        &mut self,
        status: StepStatus,
        message: impl Into<String>,
        error: Option<String>,
        issue_details: Option<IssueDetails>,
    ) -> Result<()> {
        if self.status != StepStatus::Running || !status.is_terminal() {
            return Err(Error::InvalidStateTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        let now = Utc::now();
        self.status = status;
        self.message = message.into();
        self.error = error;
        self.issue_details = issue_details;
        self.completed_at = Some(now);
        self.duration = self.started_at.map(|started| seconds_between(started, now));
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Elapsed seconds rounded to two decimals
pub fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let millis = (end - start).num_milliseconds().max(0) as f64;
    (millis / 10.0).round() / 100.0
}

/// Step counts by terminal state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl StepCounts {
    pub fn of<'a>(steps: impl IntoIterator<Item = &'a Step>) -> Self {
        let mut counts = Self::default();
        for step in steps {
            counts.total += 1;
            match step.status {
                StepStatus::Passed => counts.passed += 1,
                StepStatus::Failed => counts.failed += 1,
                StepStatus::Skipped => counts.skipped += 1,
                StepStatus::Pending | StepStatus::Running => {}
            }
        }
        counts
    }
}

// ============================================================================
// Scenario results
// ============================================================================

/// Overall scenario state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    /// The browser session could not be used at all
    Error,
}

impl ScenarioStatus {
    /// `failed` iff a step failed; `error` iff nothing failed but the
    /// scenario recorded infrastructure errors.
    pub fn derive(steps: &[Step], errors: &[String]) -> Self {
        if steps.iter().any(|s| s.status == StepStatus::Failed) {
            ScenarioStatus::Failed
        } else if !errors.is_empty() {
            ScenarioStatus::Error
        } else {
            ScenarioStatus::Passed
        }
    }

    /// Uppercase marker used in worker output
    pub fn marker(&self) -> &'static str {
        match self {
            ScenarioStatus::Passed => "PASSED",
            ScenarioStatus::Failed => "FAILED",
            ScenarioStatus::Error => "ERROR",
        }
    }

    pub fn from_marker(marker: &str) -> Option<Self> {
        match marker {
            "PASSED" => Some(ScenarioStatus::Passed),
            "FAILED" => Some(ScenarioStatus::Failed),
            "ERROR" => Some(ScenarioStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScenarioStatus::Passed => write!(f, "passed"),
            ScenarioStatus::Failed => write!(f, "failed"),
            ScenarioStatus::Error => write!(f, "error"),
        }
    }
}

/// Structured outcome of one product scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub product_id: String,
    pub product_name: String,
    pub mode: TestMode,
    pub status: ScenarioStatus,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Seconds
    pub duration: f64,
    pub timestamp: DateTime<Utc>,
}

impl ScenarioResult {
    pub fn new(
        product_id: impl Into<String>,
        product_name: impl Into<String>,
        mode: TestMode,
        steps: Vec<Step>,
        errors: Vec<String>,
        duration: f64,
    ) -> Self {
        let status = ScenarioStatus::derive(&steps, &errors);
        Self {
            product_id: product_id.into(),
            product_name: product_name.into(),
            mode,
            status,
            steps,
            errors,
            duration,
            timestamp: Utc::now(),
        }
    }

    pub fn counts(&self) -> StepCounts {
        StepCounts::of(&self.steps)
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Which products a job covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestScope {
    Product { product_id: String },
    Products { product_ids: Vec<String> },
    Category { category: String },
    All,
}

impl TestScope {
    /// Anything other than a single product
    pub fn is_batch(&self) -> bool {
        !matches!(self, TestScope::Product { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            TestScope::Product { product_id } => format!("product {}", product_id),
            TestScope::Products { product_ids } => {
                format!("{} selected products", product_ids.len())
            }
            TestScope::Category { category } => format!("category {}", category),
            TestScope::All => "all products".to_string(),
        }
    }
}

/// Parameters of a submitted job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRequest {
    pub scope: TestScope,
    #[serde(default)]
    pub mode: TestMode,
    /// Upper bound for category / all selections
    #[serde(default)]
    pub limit: Option<usize>,
}

impl TestRequest {
    pub fn new(scope: TestScope, mode: TestMode) -> Self {
        Self {
            scope,
            mode,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Reject requests that cannot select anything
    pub fn validate(&self) -> Result<()> {
        let empty = match &self.scope {
            TestScope::Product { product_id } => product_id.trim().is_empty(),
            TestScope::Products { product_ids } => {
                product_ids.iter().all(|id| id.trim().is_empty())
            }
            TestScope::Category { category } => category.trim().is_empty(),
            TestScope::All => false,
        };
        if empty {
            return Err(Error::InvalidRequest(format!(
                "{} selects no products",
                self.scope.describe()
            )));
        }
        if self.limit == Some(0) {
            return Err(Error::InvalidRequest("limit must be at least 1".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
    Timeout,
    Error,
    Stopped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Timeout => write!(f, "timeout"),
            TaskStatus::Error => write!(f, "error"),
            TaskStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Coarse progress across a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: u32,
    pub total: u32,
    pub message: String,
}

/// Scratch scope for the product whose scenario is in flight
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentProduct {
    pub index: u32,
    pub total: u32,
    pub name: String,
    pub id: Option<String>,
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Serializable view of a supervised job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub params: TestRequest,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub progress: Progress,
    pub current_product: Option<CurrentProduct>,
    #[serde(default)]
    pub product_results: BTreeMap<String, ScenarioResult>,
    /// Flat list of every finished product's steps, in arrival order
    #[serde(default)]
    pub steps: Vec<Step>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub report_path: Option<String>,
}

impl TaskSnapshot {
    pub fn new(id: impl Into<String>, params: TestRequest) -> Self {
        Self {
            id: id.into(),
            status: TaskStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            params,
            logs: Vec::new(),
            progress: Progress::default(),
            current_product: None,
            product_results: BTreeMap::new(),
            steps: Vec::new(),
            exit_code: None,
            error: None,
            report_path: None,
        }
    }

    /// Move to a terminal state once; later calls are ignored.
    pub fn finish(&mut self, status: TaskStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        true
    }

    /// Append a raw line, dropping the oldest beyond `max_lines`.
    pub fn push_log(&mut self, line: impl Into<String>, max_lines: usize) {
        self.logs.push(line.into());
        if max_lines > 0 && self.logs.len() > max_lines {
            let overflow = self.logs.len() - max_lines;
            self.logs.drain(..overflow);
        }
    }

    /// Seconds since start, or total run time once finished
    pub fn elapsed_secs(&self) -> f64 {
        seconds_between(self.started_at, self.completed_at.unwrap_or_else(Utc::now))
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id.clone(),
            status: self.status,
            started_at: self.started_at,
            completed_at: self.completed_at,
            scope: self.params.scope.describe(),
            mode: self.params.mode,
            progress: self.progress.clone(),
        }
    }
}

/// Row in a task listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: String,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub scope: String,
    pub mode: TestMode,
    pub progress: Progress,
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Task wall-clock seconds
    pub duration: f64,
    /// passed / total
    pub pass_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportProduct {
    pub product_id: String,
    pub product_name: String,
    pub status: ScenarioStatus,
    pub steps: Vec<Step>,
}

/// Persisted record of a finished job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub mode: TestMode,
    pub scope: String,
    pub summary: ReportSummary,
    pub products: Vec<ReportProduct>,
}

impl Report {
    pub fn from_snapshot(snapshot: &TaskSnapshot) -> Self {
        let counts = StepCounts::of(snapshot.product_results.values().flat_map(|r| r.steps.iter()));
        let pass_rate = if counts.total == 0 {
            0.0
        } else {
            ((counts.passed as f64 / counts.total as f64) * 10_000.0).round() / 10_000.0
        };

        let products = snapshot
            .product_results
            .values()
            .map(|result| ReportProduct {
                product_id: result.product_id.clone(),
                product_name: result.product_name.clone(),
                status: result.status,
                steps: result.steps.clone(),
            })
            .collect();

        Self {
            id: snapshot.id.clone(),
            timestamp: snapshot.completed_at.unwrap_or_else(Utc::now),
            mode: snapshot.params.mode,
            scope: snapshot.params.scope.describe(),
            summary: ReportSummary {
                total: counts.total,
                passed: counts.passed,
                failed: counts.failed,
                skipped: counts.skipped,
                duration: snapshot.elapsed_secs(),
                pass_rate,
            },
            products,
        }
    }
}

/// Row in a report listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportListing {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub mode: TestMode,
    pub scope: String,
    pub summary: ReportSummary,
}

impl From<&Report> for ReportListing {
    fn from(report: &Report) -> Self {
        Self {
            id: report.id.clone(),
            timestamp: report.timestamp,
            mode: report.mode,
            scope: report.scope.clone(),
            summary: report.summary.clone(),
        }
    }
}

// ============================================================================
// API payloads
// ============================================================================

/// Accepted submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: String,
    pub status: TaskStatus,
}

/// Rejected submission naming the task that holds the browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResponse {
    pub conflict: bool,
    pub active_task_id: String,
    pub message: String,
}

impl ConflictResponse {
    pub fn new(active_task_id: impl Into<String>) -> Self {
        let active_task_id = active_task_id.into();
        Self {
            conflict: true,
            message: format!(
                "task {} is still running; stop it or wait for it to finish",
                active_task_id
            ),
            active_task_id,
        }
    }
}

/// Result of a stop request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopResponse {
    pub task_id: String,
    pub status: TaskStatus,
    /// false when the task had already finished
    pub stopped: bool,
}
