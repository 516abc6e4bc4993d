//! Test task commands

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use shopguard_common::{
    ScenarioResult, Step, StepStatus, TaskSnapshot, TaskStatus, TaskSummary, TestMode,
    TestRequest, TestScope,
};

use crate::client::{ApiClient, Submitted};
use crate::output::{
    self, clip, print_json, print_list, print_success, print_warning, seconds, OutputFormat,
    TableDisplay,
};

/// How often `watch` polls the daemon
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Test a single product
    #[arg(long, conflicts_with_all = ["product_ids", "category", "all"])]
    pub product_id: Option<String>,

    /// Test a comma-separated list of products
    #[arg(long, value_delimiter = ',', conflicts_with_all = ["category", "all"])]
    pub product_ids: Vec<String>,

    /// Test every product in a category
    #[arg(long, conflicts_with = "all")]
    pub category: Option<String>,

    /// Test products across all categories
    #[arg(long)]
    pub all: bool,

    /// quick or full
    #[arg(long, default_value = "quick")]
    pub mode: TestMode,

    /// Maximum number of products for category and all runs
    #[arg(long)]
    pub limit: Option<usize>,

    /// Follow progress until the task finishes
    #[arg(short, long)]
    pub watch: bool,
}

impl RunArgs {
    pub fn request(&self) -> Result<TestRequest> {
        let scope = if let Some(id) = &self.product_id {
            TestScope::Product {
                product_id: id.clone(),
            }
        } else if !self.product_ids.is_empty() {
            TestScope::Products {
                product_ids: self.product_ids.clone(),
            }
        } else if let Some(category) = &self.category {
            TestScope::Category {
                category: category.clone(),
            }
        } else if self.all {
            TestScope::All
        } else {
            bail!("one of --product-id, --product-ids, --category or --all is required");
        };

        Ok(TestRequest {
            scope,
            mode: self.mode,
            limit: self.limit,
        })
    }
}

/// Task summary row
impl TableDisplay for TaskSummary {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Status", "Scope", "Mode", "Progress", "Started"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            output::task_status(self.status).to_string(),
            self.scope.clone(),
            self.mode.to_string(),
            format!("{}/{}", self.progress.current, self.progress.total),
            self.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]
    }
}

struct StepRow {
    product: String,
    number: u32,
    name: String,
    status: StepStatus,
    duration: Option<f64>,
    message: String,
}

impl StepRow {
    fn new(product: &str, step: &Step) -> Self {
        Self {
            product: product.to_string(),
            number: step.number,
            name: step.name.clone(),
            status: step.status,
            duration: step.duration,
            message: step.message.clone(),
        }
    }
}

impl TableDisplay for StepRow {
    fn headers() -> Vec<&'static str> {
        vec!["Product", "#", "Step", "Status", "Duration", "Message"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.product.clone(),
            self.number.to_string(),
            self.name.clone(),
            output::step_status(self.status).to_string(),
            seconds(self.duration),
            clip(&self.message, 60),
        ]
    }
}

/// Every step of a snapshot, finished products first
fn step_rows(snapshot: &TaskSnapshot) -> Vec<StepRow> {
    let mut rows: Vec<StepRow> = snapshot
        .product_results
        .values()
        .flat_map(|r| r.steps.iter().map(move |s| StepRow::new(&r.product_name, s)))
        .collect();
    if let Some(current) = &snapshot.current_product {
        rows.extend(current.steps.iter().map(|s| StepRow::new(&current.name, s)));
    }
    rows
}

/// Exit code for a finished task
pub fn exit_code(status: TaskStatus) -> i32 {
    match status {
        TaskStatus::Completed => 0,
        TaskStatus::Failed => 1,
        _ => 2,
    }
}

pub async fn run(client: &ApiClient, args: RunArgs, format: OutputFormat) -> Result<i32> {
    let request = args.request()?;
    match client.submit(&request).await? {
        Submitted::Conflict(conflict) => {
            if format == OutputFormat::Json {
                print_json(&conflict);
            } else {
                print_warning(&conflict.message);
                println!("Active task: {}", conflict.active_task_id.bold());
                println!("Stop it with: shopguard stop {}", conflict.active_task_id);
            }
            Ok(1)
        }
        Submitted::Accepted(submitted) => {
            if format == OutputFormat::Json && !args.watch {
                print_json(&submitted);
                return Ok(0);
            }
            print_success(&format!(
                "Task {} started ({}, {} mode)",
                submitted.task_id.bold(),
                request.scope.describe(),
                request.mode
            ));
            if args.watch {
                let snapshot = watch(client, &submitted.task_id, format).await?;
                return Ok(exit_code(snapshot.status));
            }
            Ok(0)
        }
    }
}

pub async fn status(client: &ApiClient, id: &str, logs: bool, format: OutputFormat) -> Result<()> {
    let snapshot = client.task(id).await?;
    if format == OutputFormat::Json {
        print_json(&snapshot);
        return Ok(());
    }

    println!("Task:     {}", snapshot.id.bold());
    println!("Status:   {}", output::task_status(snapshot.status));
    println!("Scope:    {} ({} mode)", snapshot.params.scope.describe(), snapshot.params.mode);
    println!(
        "Progress: {}/{} {}",
        snapshot.progress.current, snapshot.progress.total, snapshot.progress.message
    );
    println!("Elapsed:  {}", seconds(Some(snapshot.elapsed_secs())));
    if let Some(code) = snapshot.exit_code {
        println!("Exit:     {}", code);
    }
    if let Some(error) = &snapshot.error {
        println!("Error:    {}", error.red());
    }
    if let Some(path) = &snapshot.report_path {
        println!("Report:   {}", path);
    }

    for result in snapshot.product_results.values() {
        println!("  {} {}", output::scenario_status(result.status), result.product_name);
        for error in &result.errors {
            println!("    {}", error.red());
        }
    }

    let rows = step_rows(&snapshot);
    if !rows.is_empty() {
        println!("{}", output::table(&rows));
    }
    print_issues(&snapshot);

    if logs {
        println!("{}", "Logs:".bold());
        for line in &snapshot.logs {
            println!("  {}", line);
        }
    }
    Ok(())
}

fn print_issues(snapshot: &TaskSnapshot) {
    let failed = snapshot
        .product_results
        .values()
        .flat_map(|r| r.steps.iter().map(move |s| (r.product_name.as_str(), s)))
        .filter(|(_, s)| s.status == StepStatus::Failed);

    for (product, step) in failed {
        let Some(issue) = &step.issue_details else {
            continue;
        };
        println!(
            "{} {} / step {} {}",
            "Issue:".red().bold(),
            product,
            step.number,
            step.name
        );
        println!("  Problem:    {}", issue.problem);
        println!("  Root cause: {}", issue.root_cause.replace('\n', "\n              "));
        for error in &issue.js_errors {
            println!("  Script:     {}", error.dimmed());
        }
    }
}

/// Tracks which step states `watch` has already printed
#[derive(Default)]
pub struct WatchState {
    printed: HashMap<(String, u32), StepStatus>,
    finished: HashSet<String>,
    progress: String,
}

impl WatchState {
    /// Lines describing what changed since the previous snapshot
    pub fn advance(&mut self, snapshot: &TaskSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        let progress = format!(
            "[{}/{}] {}",
            snapshot.progress.current, snapshot.progress.total, snapshot.progress.message
        );
        if progress != self.progress && !snapshot.progress.message.is_empty() {
            lines.push(progress.clone());
        }
        self.progress = progress;

        for result in snapshot.product_results.values() {
            self.steps(&result.product_id, &result.steps, &mut lines);
            self.finish_scenario(result, &mut lines);
        }
        if let Some(current) = &snapshot.current_product {
            let key = current
                .id
                .clone()
                .unwrap_or_else(|| format!("product-{}", current.index));
            self.steps(&key, &current.steps, &mut lines);
        }
        lines
    }

    fn steps(&mut self, key: &str, steps: &[Step], lines: &mut Vec<String>) {
        for step in steps {
            let slot = (key.to_string(), step.number);
            if self.printed.get(&slot) == Some(&step.status) {
                continue;
            }
            self.printed.insert(slot, step.status);
            let line = match step.status {
                StepStatus::Pending => continue,
                StepStatus::Running => format!("  [Step {}] {} ...", step.number, step.name),
                _ => format!(
                    "  [Step {}] {} {} {} ({})",
                    step.number,
                    step.name,
                    output::step_status(step.status),
                    step.message,
                    seconds(step.duration)
                ),
            };
            lines.push(line);
        }
    }

    fn finish_scenario(&mut self, result: &ScenarioResult, lines: &mut Vec<String>) {
        if !self.finished.insert(result.product_id.clone()) {
            return;
        }
        lines.push(format!(
            "{} {}",
            output::scenario_status(result.status),
            result.product_name
        ));
    }
}

/// Poll until the task is terminal, printing changes
pub async fn watch(client: &ApiClient, id: &str, format: OutputFormat) -> Result<TaskSnapshot> {
    let mut state = WatchState::default();
    loop {
        let snapshot = client.task(id).await?;
        if format == OutputFormat::Table {
            for line in state.advance(&snapshot) {
                println!("{}", line);
            }
        }

        if snapshot.status.is_terminal() {
            if format == OutputFormat::Json {
                print_json(&snapshot);
            } else {
                println!(
                    "Task {} {} after {}",
                    snapshot.id,
                    output::task_status(snapshot.status),
                    seconds(Some(snapshot.elapsed_secs()))
                );
                if let Some(error) = &snapshot.error {
                    println!("  {}", error.red());
                }
                print_issues(&snapshot);
            }
            return Ok(snapshot);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

pub async fn stop(client: &ApiClient, id: &str, format: OutputFormat) -> Result<()> {
    let stopped = client.stop(id).await?;
    if format == OutputFormat::Json {
        print_json(&stopped);
    } else if stopped.stopped {
        print_success(&format!("Task {} stopped", stopped.task_id));
    } else {
        println!(
            "Task {} already finished: {}",
            stopped.task_id,
            output::task_status(stopped.status)
        );
    }
    Ok(())
}

pub async fn tasks(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let tasks = client.tasks().await?;
    print_list(&tasks, format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use shopguard_common::CurrentProduct;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        run: RunArgs,
    }

    fn parse(args: &[&str]) -> Result<TestRequest> {
        let mut argv = vec!["shopguard"];
        argv.extend_from_slice(args);
        Harness::try_parse_from(argv)?.run.request()
    }

    #[test]
    fn test_request_from_flags() {
        let request = parse(&["--product-ids", "a,b", "--mode", "full"]).unwrap();
        assert_eq!(
            request.scope,
            TestScope::Products {
                product_ids: vec!["a".to_string(), "b".to_string()]
            }
        );
        assert_eq!(request.mode, TestMode::Full);

        let request = parse(&["--category", "bikes", "--limit", "3"]).unwrap();
        assert_eq!(request.limit, Some(3));
        assert!(parse(&[]).is_err());
        assert!(parse(&["--all", "--category", "bikes"]).is_err());
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(exit_code(TaskStatus::Completed), 0);
        assert_eq!(exit_code(TaskStatus::Failed), 1);
        assert_eq!(exit_code(TaskStatus::Timeout), 2);
        assert_eq!(exit_code(TaskStatus::Stopped), 2);
    }

    #[test]
    fn test_watch_prints_each_transition_once() {
        let mut snapshot = TaskSnapshot::new(
            "t1",
            TestRequest::new(TestScope::All, TestMode::Quick),
        );
        let mut step = Step::new(1, "Page access", "");
        step.status = StepStatus::Running;
        snapshot.current_product = Some(CurrentProduct {
            index: 1,
            total: 1,
            name: "A".to_string(),
            id: Some("a".to_string()),
            steps: vec![step],
            errors: Vec::new(),
        });

        let mut state = WatchState::default();
        let first = state.advance(&snapshot);
        assert_eq!(first.len(), 1);
        assert!(first[0].contains("[Step 1] Page access ..."));
        assert!(state.advance(&snapshot).is_empty());

        if let Some(current) = snapshot.current_product.as_mut() {
            current.steps[0].status = StepStatus::Passed;
            current.steps[0].message = "Page loaded".to_string();
        }
        let second = state.advance(&snapshot);
        assert_eq!(second.len(), 1);
        assert!(second[0].contains("Page loaded"));

        let current = snapshot.current_product.take().unwrap();
        snapshot.product_results.insert(
            "a".to_string(),
            ScenarioResult::new("a", "A", TestMode::Quick, current.steps, Vec::new(), 1.0),
        );
        let third = state.advance(&snapshot);
        assert_eq!(third.len(), 1);
        assert!(third[0].contains("A"));
        assert!(state.advance(&snapshot).is_empty());
    }
}
