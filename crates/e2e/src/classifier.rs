//! Issue classifier
//!
//! Maps script errors captured in the page to a probable root cause. Rules are
//! tried in order against all captured errors joined together; the first match
//! wins. Identifiers found in the error text are woven into the explanation.

use once_cell::sync::Lazy;
use regex::Regex;

/// Root-cause category, in match priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    MalformedUri,
    NullAccess,
    UndeclaredIdentifier,
    NotCallable,
    Syntax,
    Network,
    DomQuery,
    EventBinding,
    JsonParse,
    Unknown,
}

struct Rule {
    kind: IssueKind,
    pattern: Regex,
    explain: fn(&str) -> String,
}

fn rule(kind: IssueKind, pattern: &str, explain: fn(&str) -> String) -> Rule {
    Rule {
        kind,
        pattern: compile(pattern),
        explain,
    }
}

fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => panic!("invalid classifier pattern {:?}: {}", pattern, e),
    }
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule(
            IssueKind::MalformedUri,
            r"(?i)uri malformed|uricomponent",
            explain_malformed_uri,
        ),
        rule(
            IssueKind::NullAccess,
            r"(?i)cannot read propert(y|ies)",
            explain_null_access,
        ),
        rule(
            IssueKind::UndeclaredIdentifier,
            r"(?i)[\w$]+ is not defined",
            explain_undeclared,
        ),
        rule(
            IssueKind::NotCallable,
            r"(?i)[\w$.]+ is not a function",
            explain_not_callable,
        ),
        rule(
            IssueKind::Syntax,
            r"(?i)syntaxerror|unexpected token",
            explain_syntax,
        ),
        rule(
            IssueKind::Network,
            r"(?i)fetch|network|xhr|xmlhttprequest|failed to load resource",
            explain_network,
        ),
        rule(
            IssueKind::DomQuery,
            r"(?i)queryselector|getelementby|appendchild",
            explain_dom_query,
        ),
        rule(
            IssueKind::EventBinding,
            r"(?i)addeventlistener|\bevent\b",
            explain_event_binding,
        ),
        rule(
            IssueKind::JsonParse,
            r"(?i)json.*(parse|stringify)|(parse|stringify).*json",
            explain_json,
        ),
    ]
});

static NULL_PROPERTY_MODERN: Lazy<Regex> = Lazy::new(|| {
    compile(r#"(?i)cannot read properties of (null|undefined) \(reading ['"]([^'"]+)['"]\)"#)
});
static NULL_PROPERTY_LEGACY: Lazy<Regex> = Lazy::new(|| {
    compile(r#"(?i)cannot read property ['"]?([\w$]+)['"]? of (null|undefined)"#)
});
static UNDECLARED: Lazy<Regex> = Lazy::new(|| compile(r"([\w$]+) is not defined"));
static NOT_CALLABLE: Lazy<Regex> = Lazy::new(|| compile(r"([\w$.]+) is not a function"));

/// Classify and explain; empty input yields a generic explanation.
pub fn classify(js_errors: &[String]) -> String {
    if js_errors.is_empty() {
        return "No script error was captured on the page. The failure is in page \
                behaviour rather than an uncaught exception."
            .to_string();
    }
    let joined = js_errors.join(" ");
    match matching_rule(&joined) {
        Some(rule) => (rule.explain)(&joined),
        None => explain_unknown(&joined, &js_errors[0]),
    }
}

/// Category only, for callers that branch on it
pub fn classify_kind(js_errors: &[String]) -> Option<IssueKind> {
    if js_errors.is_empty() {
        return None;
    }
    let joined = js_errors.join(" ");
    Some(
        matching_rule(&joined)
            .map(|r| r.kind)
            .unwrap_or(IssueKind::Unknown),
    )
}

fn matching_rule(joined: &str) -> Option<&'static Rule> {
    RULES.iter().find(|rule| rule.pattern.is_match(joined))
}

fn explain_malformed_uri(_: &str) -> String {
    [
        "[Malformed URI] decodeURIComponent() or encodeURIComponent() received an invalid value. Common causes:",
        "- a value read from a cookie or localStorage is null or undefined",
        "- a URL parameter contains unencoded characters such as %, & or =",
        "- string concatenation produced an invalid URI",
        "Suggested fix: validate the argument before decoding and wrap the call in try/catch.",
    ]
    .join("\n")
}

fn explain_null_access(joined: &str) -> String {
    let found = NULL_PROPERTY_MODERN
        .captures(joined)
        .map(|c| (c[2].to_string(), c[1].to_lowercase()))
        .or_else(|| {
            NULL_PROPERTY_LEGACY
                .captures(joined)
                .map(|c| (c[1].to_string(), c[2].to_lowercase()))
        });

    match found {
        Some((prop, target)) => [
            format!(
                "[Null reference] Code read the '{}' property of {}. Common causes:",
                prop, target
            ),
            format!(
                "- a DOM query (querySelector/getElementById) matched nothing and returned {}",
                target
            ),
            "- asynchronous data was used before it finished loading".to_string(),
            format!("- an intermediate value in the property chain is {}", target),
            format!(
                "Suggested fix: add a null check before reading .{}: if (obj && obj.{})",
                prop, prop
            ),
        ]
        .join("\n"),
        None => [
            "[Null reference] Code read a property of a null or undefined value.",
            "Suggested fix: make sure the variable is initialised and add a null check before use.",
        ]
        .join("\n"),
    }
}

fn explain_undeclared(joined: &str) -> String {
    let name = UNDECLARED
        .captures(joined)
        .map(|c| c[1].to_string())
        .unwrap_or_default();
    [
        format!(
            "[Undeclared identifier] Code referenced '{}', which is not declared. Common causes:",
            name
        ),
        format!("- the script defining '{}' loaded late or not at all", name),
        "- the name is misspelled".to_string(),
        "- it is declared in a scope the caller cannot see".to_string(),
        format!(
            "Suggested fix: check where '{}' is defined and the script load order.",
            name
        ),
    ]
    .join("\n")
}

fn explain_not_callable(joined: &str) -> String {
    let name = NOT_CALLABLE
        .captures(joined)
        .map(|c| c[1].to_string())
        .unwrap_or_default();
    [
        format!(
            "[Not a function] Code called '{}' but its value is not a function. Common causes:",
            name
        ),
        format!("- '{}' was overwritten with a non-function value", name),
        "- the method name is misspelled".to_string(),
        "- a library or plugin providing it did not load".to_string(),
        format!("Suggested fix: check the type and origin of '{}'.", name),
    ]
    .join("\n")
}

fn explain_syntax(_: &str) -> String {
    [
        "[Syntax error] A script could not be parsed. Common causes:",
        "- unbalanced brackets or braces",
        "- a malformed template literal or regular expression",
        "- a truncated or mis-served script file",
        "Suggested fix: open the browser devtools console to find the exact location.",
    ]
    .join("\n")
}

fn explain_network(_: &str) -> String {
    [
        "[Network request] An AJAX or fetch request failed. Common causes:",
        "- the endpoint URL is wrong or the server did not respond",
        "- a CORS policy blocked the request",
        "- request parameters are malformed",
        "Suggested fix: inspect the request URL, parameters and server response.",
    ]
    .join("\n")
}

fn explain_dom_query(_: &str) -> String {
    [
        "[DOM operation] A DOM operation failed. Common causes:",
        "- a selector matched no element",
        "- the code ran before the DOM finished loading",
        "- the element was removed from the document",
        "Suggested fix: run DOM code after DOMContentLoaded and check that elements exist.",
    ]
    .join("\n")
}

fn explain_event_binding(_: &str) -> String {
    [
        "[Event handling] An error occurred while binding or handling an event. Common causes:",
        "- the event target element does not exist",
        "- `this` inside the handler is not what the code expects",
        "- the handler reads a missing property of the event object",
        "Suggested fix: check the bound element and the handler logic.",
    ]
    .join("\n")
}

fn explain_json(_: &str) -> String {
    [
        "[JSON parse] JSON data could not be parsed. Common causes:",
        "- the server returned HTML or text instead of JSON",
        "- the JSON string contains invalid characters",
        "- undefined or an empty string was parsed",
        "Suggested fix: validate the data source and check the payload before parsing.",
    ]
    .join("\n")
}

fn explain_unknown(joined: &str, first: &str) -> String {
    let lower = joined.to_lowercase();
    let label = if lower.contains("typeerror") {
        "TypeError"
    } else if lower.contains("referenceerror") {
        "ReferenceError"
    } else if lower.contains("rangeerror") {
        "RangeError"
    } else {
        "Unknown script error"
    };
    let excerpt: String = first.chars().take(150).collect();
    [
        format!("[{}] {}", label, excerpt),
        "Suggested fix: open the browser devtools console for the full stack trace.".to_string(),
    ]
    .join("\n")
}
