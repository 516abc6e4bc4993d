//! Log event parser
//!
//! Decodes the worker's stdout, one line at a time, into task snapshot
//! mutations. Each line is matched against an ordered rule table; the first
//! rule that matches produces an [`Event`], which a reducer applies to the
//! snapshot. Lines no rule matches only land in the raw log. Nothing here
//! panics on malformed or out-of-order input; at worst a field stays unset.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::{debug, trace};

use shopguard_common::protocol::{self, IssueField};
use shopguard_common::{
    seconds_between, CurrentProduct, IssueDetails, ScenarioResult, ScenarioStatus, Step,
    StepStatus, TaskSnapshot, TestMode,
};

/// Structured event carried by one worker line
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    BatchStarted { total: u32 },
    ScenarioStarted { index: u32, total: u32, name: String },
    ProductId(String),
    Mode(TestMode),
    StepStarted { number: u32, name: String },
    Description(String),
    StepError(String),
    IssueHeader,
    IssueField(IssueField, String),
    Continuation(String),
    StepResult { status: StepStatus, message: String, duration: Option<f64> },
    ScenarioError(String),
    ScenarioFinished { status: ScenarioStatus, duration: Option<f64> },
    Progress { index: u32, total: u32, name: String, status: ScenarioStatus },
}

struct Rule {
    tag: &'static str,
    pattern: Regex,
    decode: fn(&Captures) -> Option<Event>,
}

fn rule(tag: &'static str, pattern: &str, decode: fn(&Captures) -> Option<Event>) -> Rule {
    Rule {
        tag,
        pattern: Regex::new(pattern).unwrap_or_else(|e| panic!("bad {} pattern: {}", tag, e)),
        decode,
    }
}

fn text(caps: &Captures, i: usize) -> String {
    caps.get(i).map(|m| m.as_str().trim().to_string()).unwrap_or_default()
}

fn number<T: std::str::FromStr>(caps: &Captures, i: usize) -> Option<T> {
    caps.get(i)?.as_str().parse().ok()
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule("batch", r"^Batch started: (\d+) products?$", |c| {
            Some(Event::BatchStarted { total: number(c, 1)? })
        }),
        rule("scenario_start", r"^\[(\d+)/(\d+)\] Testing product: (.*)$", |c| {
            Some(Event::ScenarioStarted {
                index: number(c, 1)?,
                total: number(c, 2)?,
                name: text(c, 3),
            })
        }),
        rule("product_id", r"^Product ID: (.+)$", |c| Some(Event::ProductId(text(c, 1)))),
        rule("mode", r"^Test mode: (\w+)$", |c| {
            c.get(1)?.as_str().parse().ok().map(Event::Mode)
        }),
        rule("step_start", r"^\[Step (\d+)\] (.*)$", |c| {
            Some(Event::StepStarted {
                number: number(c, 1)?,
                name: text(c, 2),
            })
        }),
        rule("description", r"^  Description: (.*)$", |c| {
            Some(Event::Description(text(c, 1)))
        }),
        rule("error", r"^  Error: (.*)$", |c| Some(Event::StepError(text(c, 1)))),
        rule("issue_header", r"^  Issue details:\s*$", |_| Some(Event::IssueHeader)),
        rule(
            "issue_field",
            r"^ {5}(Scenario|Operation|Problem|Root cause|Script error): (.*)$",
            |c| {
                let field = IssueField::from_label(c.get(1)?.as_str())?;
                Some(Event::IssueField(field, text(c, 2)))
            },
        ),
        rule("continuation", r"^ {7,}(\S.*)$", |c| Some(Event::Continuation(text(c, 1)))),
        rule(
            "result",
            r"^  (\S) Result: (.*?)(?: \(took (\d+(?:\.\d+)?)s\))?$",
            |c| {
                let glyph = c.get(1)?.as_str().chars().next()?;
                Some(Event::StepResult {
                    status: protocol::status_from_glyph(glyph)?,
                    message: text(c, 2),
                    duration: number(c, 3),
                })
            },
        ),
        rule("scenario_error", r"^Scenario error: (.*)$", |c| {
            Some(Event::ScenarioError(text(c, 1)))
        }),
        rule(
            "scenario_done",
            r"^Scenario finished: (PASSED|FAILED|ERROR)(?: \(took (\d+(?:\.\d+)?)s\))?$",
            |c| {
                Some(Event::ScenarioFinished {
                    status: ScenarioStatus::from_marker(c.get(1)?.as_str())?,
                    duration: number(c, 2),
                })
            },
        ),
        rule(
            "progress",
            r"^\[(\d+)/(\d+)\] (.*) - (PASSED|FAILED|ERROR) \(\d+(?:\.\d+)?s\)$",
            |c| {
                Some(Event::Progress {
                    index: number(c, 1)?,
                    total: number(c, 2)?,
                    name: text(c, 3),
                    status: ScenarioStatus::from_marker(c.get(4)?.as_str())?,
                })
            },
        ),
    ]
});

/// First matching rule's event, if any
pub fn decode(line: &str) -> Option<Event> {
    let line = line.trim_end_matches(['\r', '\n']);
    for rule in RULES.iter() {
        if let Some(caps) = rule.pattern.captures(line) {
            trace!("line matched {}", rule.tag);
            return (rule.decode)(&caps);
        }
    }
    None
}

/// Per-task decoding state
#[derive(Debug, Default)]
pub struct LogParser {
    mode: Option<TestMode>,
    /// Inside the issue block of the newest step
    in_issue: bool,
    last_field: Option<IssueField>,
}

impl LogParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stdout line and apply whatever it describes
    pub fn feed(&mut self, snapshot: &mut TaskSnapshot, line: &str, max_log_lines: usize) {
        snapshot.push_log(line, max_log_lines);
        if let Some(event) = decode(line) {
            self.apply(snapshot, event);
        }
    }

    pub fn apply(&mut self, snapshot: &mut TaskSnapshot, event: Event) {
        match event {
            Event::BatchStarted { total } => {
                snapshot.progress.total = total;
                snapshot.progress.message = format!("Batch of {} products started", total);
            }
            Event::ScenarioStarted { index, total, name } => {
                if snapshot.current_product.is_some() {
                    debug!("Scenario started before the previous one finished");
                    self.flush(snapshot, None, None);
                }
                self.close_issue();
                snapshot.progress.current = index.saturating_sub(1);
                snapshot.progress.total = total;
                snapshot.progress.message = format!("Testing product: {}", name);
                snapshot.current_product = Some(CurrentProduct {
                    index,
                    total,
                    name,
                    ..CurrentProduct::default()
                });
            }
            Event::ProductId(id) => {
                if let Some(current) = snapshot.current_product.as_mut() {
                    current.id = Some(id);
                }
            }
            Event::Mode(mode) => self.mode = Some(mode),
            Event::StepStarted { number, name } => {
                self.close_issue();
                let mut step = Step::new(number, name, "");
                step.status = StepStatus::Running;
                step.started_at = Some(Utc::now());
                open_scope(snapshot).steps.push(step);
            }
            Event::Description(text) => {
                if let Some(step) = open_step(snapshot) {
                    step.description = text;
                }
            }
            Event::StepError(text) => {
                if let Some(step) = open_step(snapshot) {
                    step.error = Some(text);
                }
            }
            Event::IssueHeader => {
                if let Some(step) = open_step(snapshot) {
                    step.issue_details.get_or_insert_with(IssueDetails::default);
                    self.in_issue = true;
                    self.last_field = None;
                }
            }
            Event::IssueField(field, text) => {
                if !self.in_issue {
                    return;
                }
                if let Some(issue) = open_step(snapshot).and_then(|s| s.issue_details.as_mut()) {
                    match field {
                        IssueField::Scenario => issue.scenario = text,
                        IssueField::Operation => issue.operation = text,
                        IssueField::Problem => issue.problem = text,
                        IssueField::RootCause => issue.root_cause = text,
                        IssueField::ScriptError => issue.js_errors.push(text),
                    }
                    self.last_field = Some(field);
                }
            }
            Event::Continuation(text) => {
                if !self.in_issue || self.last_field != Some(IssueField::RootCause) {
                    return;
                }
                if let Some(issue) = open_step(snapshot).and_then(|s| s.issue_details.as_mut()) {
                    issue.root_cause.push('\n');
                    issue.root_cause.push_str(&text);
                }
            }
            Event::StepResult {
                status,
                message,
                duration,
            } => {
                self.close_issue();
                if let Some(step) = open_step(snapshot) {
                    let now = Utc::now();
                    step.status = status;
                    step.message = message;
                    step.completed_at = Some(now);
                    step.duration =
                        duration.or_else(|| step.started_at.map(|s| seconds_between(s, now)));
                }
            }
            Event::ScenarioError(text) => {
                if let Some(current) = snapshot.current_product.as_mut() {
                    current.errors.push(text);
                }
            }
            Event::ScenarioFinished { status, duration } => {
                self.close_issue();
                if snapshot.current_product.is_some() {
                    self.flush(snapshot, Some(status), duration);
                }
            }
            Event::Progress {
                index,
                total,
                name,
                status,
            } => {
                snapshot.progress.current = index;
                snapshot.progress.total = total;
                snapshot.progress.message = format!("{} - {}", name, status.marker());
            }
        }
    }

    fn close_issue(&mut self) {
        self.in_issue = false;
        self.last_field = None;
    }

    /// Move the scratch product into the finished results
    fn flush(
        &mut self,
        snapshot: &mut TaskSnapshot,
        reported: Option<ScenarioStatus>,
        duration: Option<f64>,
    ) {
        let Some(current) = snapshot.current_product.take() else {
            return;
        };
        let mut errors = current.errors;
        if reported == Some(ScenarioStatus::Error) && errors.is_empty() {
            errors.push("Scenario ended with an error".to_string());
        }

        let key = current
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("product-{}", current.index));
        let name = if current.name.is_empty() {
            key.clone()
        } else {
            current.name
        };
        let mode = self.mode.unwrap_or(snapshot.params.mode);
        let result = ScenarioResult::new(
            key.clone(),
            name,
            mode,
            current.steps,
            errors,
            duration.unwrap_or_default(),
        );

        snapshot.steps.extend(result.steps.iter().cloned());
        snapshot.progress.current = snapshot.progress.current.max(current.index);
        snapshot.product_results.insert(key, result);
    }
}

/// Scratch scope for step lines, opened implicitly if the worker skipped
/// the scenario header
fn open_scope(snapshot: &mut TaskSnapshot) -> &mut CurrentProduct {
    let total = snapshot.progress.total.max(1);
    snapshot.current_product.get_or_insert_with(|| CurrentProduct {
        index: 1,
        total,
        ..CurrentProduct::default()
    })
}

/// Newest step, if it has not reached a terminal state
fn open_step(snapshot: &mut TaskSnapshot) -> Option<&mut Step> {
    snapshot
        .current_product
        .as_mut()?
        .steps
        .last_mut()
        .filter(|s| !s.is_terminal())
}
