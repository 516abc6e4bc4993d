//! Error types for the test worker

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Browser driver not found. Install with: npm install playwright && npx playwright install chromium")]
    DriverNotFound,

    #[error("Browser failed to start: {0}")]
    DriverStartup(String),

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("Browser session closed")]
    SessionClosed,

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl E2eError {
    /// Faults after which the session cannot be used any further
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            E2eError::DriverNotFound | E2eError::DriverStartup(_) | E2eError::SessionClosed
        )
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
