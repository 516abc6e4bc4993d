//! Browser session abstraction
//!
//! A session is one automated tab. Scenario code only talks to this trait so
//! it can run against the Playwright driver or a scripted storefront.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::E2eResult;

/// Snapshot of a matched element at lookup time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// Driver-side handle, valid until the next navigation
    pub handle: u64,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Visible and not disabled
    pub fn is_actionable(&self) -> bool {
        self.visible && self.enabled
    }
}

/// Ordered buffer of script errors captured in the page
#[derive(Debug, Clone, Default)]
pub struct ErrorLog {
    inner: Arc<Mutex<Vec<String>>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, error: impl Into<String>) {
        self.inner.lock().push(error.into());
    }

    /// Current length, usable as a mark for [`ErrorLog::since`]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn since(&self, mark: usize) -> Vec<String> {
        let errors = self.inner.lock();
        errors.get(mark..).map(<[String]>::to_vec).unwrap_or_default()
    }

    /// Last `n` errors, oldest first
    pub fn tail(&self, n: usize) -> Vec<String> {
        let errors = self.inner.lock();
        let start = errors.len().saturating_sub(n);
        errors[start..].to_vec()
    }

    pub fn all(&self) -> Vec<String> {
        self.inner.lock().clone()
    }
}

#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> E2eResult<()>;

    async fn current_url(&mut self) -> E2eResult<String>;

    async fn title(&mut self) -> E2eResult<String>;

    /// Zero or more matches, in document order
    async fn find(&mut self, selector: &str) -> E2eResult<Vec<Element>>;

    /// Matches inside `parent`
    async fn find_within(&mut self, parent: &Element, selector: &str) -> E2eResult<Vec<Element>>;

    async fn click(&mut self, element: &Element) -> E2eResult<()>;

    async fn fill(&mut self, element: &Element, value: &str) -> E2eResult<()>;

    async fn evaluate(&mut self, script: &str) -> E2eResult<serde_json::Value>;

    /// Let the page settle
    async fn wait(&mut self, ms: u64) -> E2eResult<()>;

    /// Shared handle to the session's captured script errors
    fn errors(&self) -> ErrorLog;

    async fn close(&mut self) -> E2eResult<()>;
}

/// Opens a fresh session per scenario
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> E2eResult<Box<dyn BrowserSession>>;
}

/// Matches for `selector`; a failed lookup counts as no match unless the
/// session is gone
pub async fn lookup(session: &mut dyn BrowserSession, selector: &str) -> E2eResult<Vec<Element>> {
    match session.find(selector).await {
        Ok(elements) => Ok(elements),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            debug!("Lookup {} failed: {}", selector, e);
            Ok(Vec::new())
        }
    }
}

/// First match across a list of selectors
pub async fn find_first(
    session: &mut dyn BrowserSession,
    selectors: &[&str],
) -> E2eResult<Option<Element>> {
    for selector in selectors {
        if let Some(element) = lookup(session, selector).await?.into_iter().next() {
            return Ok(Some(element));
        }
    }
    Ok(None)
}

/// First visible match across a list of selectors
pub async fn find_visible(
    session: &mut dyn BrowserSession,
    selectors: &[&str],
) -> E2eResult<Option<Element>> {
    for selector in selectors {
        if let Some(element) = lookup(session, selector)
            .await?
            .into_iter()
            .find(|e| e.visible)
        {
            return Ok(Some(element));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selectors;
    use crate::testing::{FakeStorefront, StoreConfig};

    #[test]
    fn test_error_log_marks() {
        let log = ErrorLog::new();
        log.push("first");
        let mark = log.len();
        log.push("second");
        log.push("third");

        assert_eq!(log.since(mark), vec!["second", "third"]);
        assert_eq!(log.tail(1), vec!["third"]);
        assert_eq!(log.tail(10).len(), 3);
        assert!(log.since(10).is_empty());
    }

    #[test]
    fn test_error_log_is_shared() {
        let log = ErrorLog::new();
        let handle = log.clone();
        handle.push("from driver");
        assert_eq!(log.all(), vec!["from driver"]);
    }

    #[tokio::test]
    async fn test_failed_lookup_counts_as_not_found() {
        let mut store = FakeStorefront::new(StoreConfig {
            flaky_selector: Some("button[name='add']".to_string()),
            ..StoreConfig::default()
        });
        store.navigate("https://shop.example/products/trail-bike").await.unwrap();

        assert!(store.find("button[name='add']").await.is_err());
        assert!(find_first(&mut store, &["button[name='add']"]).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_find_first_skips_a_failed_selector() {
        let mut store = FakeStorefront::new(StoreConfig {
            flaky_selector: Some("button[name='add']".to_string()),
            ..StoreConfig::default()
        });
        store.navigate("https://shop.example/products/trail-bike").await.unwrap();

        let found = find_first(&mut store, selectors::ADD_TO_CART).await.unwrap();
        assert!(found.is_none());
        let found = find_visible(&mut store, selectors::ADD_TO_CART).await.unwrap();
        assert_eq!(found.map(|e| e.tag), Some("button".to_string()));
    }
}
