//! ShopGuard test worker
//!
//! Drives a real browser through a storefront's purchase flow, one product
//! at a time, and prints line-oriented progress that the daemon parses.
//!
//! ```text
//! catalog ──select──▶ batch ──per product──▶ ScenarioRunner
//!                                             ├── SessionFactory::open()
//!                                             ├── steps: start → body → complete
//!                                             └── classifier (script errors → root cause)
//!                       reporter ◀── step events
//! ```

pub mod batch;
pub mod browser;
pub mod classifier;
pub mod error;
pub mod playwright;
pub mod reporter;
pub mod scenario;
pub mod selectors;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{run_batch, BatchSummary};
pub use browser::{BrowserSession, Element, ErrorLog, SessionFactory};
pub use error::{E2eError, E2eResult};
pub use scenario::{ScenarioOptions, ScenarioRunner};
