//! Output formatting for CLI

use clap::ValueEnum;
use colored::{ColoredString, Colorize};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use shopguard_common::{ScenarioStatus, StepStatus, TaskStatus};

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

pub fn table<T: TableDisplay>(items: &[T]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(T::headers());
    for item in items {
        table.add_row(item.row());
    }
    table
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => print_error(&format!("cannot encode output: {}", e)),
    }
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(items),
        OutputFormat::Table if items.is_empty() => println!("No items found."),
        OutputFormat::Table => println!("{}", table(items)),
    }
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "!".yellow(), message);
}

pub fn task_status(status: TaskStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        TaskStatus::Running => text.cyan(),
        TaskStatus::Completed => text.green(),
        TaskStatus::Failed => text.red(),
        TaskStatus::Timeout | TaskStatus::Error => text.red().bold(),
        TaskStatus::Stopped => text.yellow(),
    }
}

pub fn scenario_status(status: ScenarioStatus) -> ColoredString {
    match status {
        ScenarioStatus::Passed => status.marker().green(),
        ScenarioStatus::Failed => status.marker().red(),
        ScenarioStatus::Error => status.marker().red().bold(),
    }
}

pub fn step_status(status: StepStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        StepStatus::Passed => text.green(),
        StepStatus::Failed => text.red(),
        StepStatus::Skipped => text.yellow(),
        StepStatus::Running => text.cyan(),
        StepStatus::Pending => text.dimmed(),
    }
}

/// Seconds as `12.34s`, or `-` when unknown
pub fn seconds(value: Option<f64>) -> String {
    value
        .map(|s| format!("{:.2}s", s))
        .unwrap_or_else(|| "-".to_string())
}

/// Truncate long free text for table cells
pub fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", kept)
}
