//! Report commands

use anyhow::Result;
use colored::Colorize;

use shopguard_common::{Report, ReportListing};

use crate::client::ApiClient;
use crate::output::{self, print_json, print_list, OutputFormat, TableDisplay};

impl TableDisplay for ReportListing {
    fn headers() -> Vec<&'static str> {
        vec![
            "ID", "Finished", "Scope", "Mode", "Steps", "Passed", "Failed", "Skipped", "Pass rate",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            self.scope.clone(),
            self.mode.to_string(),
            self.summary.total.to_string(),
            self.summary.passed.to_string(),
            self.summary.failed.to_string(),
            self.summary.skipped.to_string(),
            percent(self.summary.pass_rate),
        ]
    }
}

fn percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

pub async fn list(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let reports = client.reports().await?;
    print_list(&reports, format);
    Ok(())
}

pub async fn show(client: &ApiClient, id: &str, format: OutputFormat) -> Result<()> {
    let report = client.report(id).await?;
    if format == OutputFormat::Json {
        print_json(&report);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &Report) {
    println!("Report:    {}", report.id.bold());
    println!("Finished:  {}", report.timestamp.format("%Y-%m-%d %H:%M:%S"));
    println!("Scope:     {} ({} mode)", report.scope, report.mode);
    println!(
        "Steps:     {} total, {} passed, {} failed, {} skipped",
        report.summary.total, report.summary.passed, report.summary.failed, report.summary.skipped
    );
    println!("Pass rate: {}", percent(report.summary.pass_rate));
    println!("Duration:  {}", output::seconds(Some(report.summary.duration)));

    for product in &report.products {
        println!();
        println!(
            "{} {} ({})",
            output::scenario_status(product.status),
            product.product_name,
            product.product_id
        );
        for step in &product.steps {
            println!(
                "  {:>2}. {:<28} {:<8} {}",
                step.number,
                step.name,
                output::step_status(step.status),
                output::clip(&step.message, 70)
            );
        }
    }
}
