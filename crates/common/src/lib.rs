//! ShopGuard Common Library
//!
//! Shared data model, product catalog, and the worker output protocol used by
//! both the test worker and the job supervisor.

pub mod catalog;
pub mod error;
pub mod protocol;
pub mod types;

// Re-export commonly used types
pub use catalog::{Catalog, Product, ProductSelectors, Selection, DEFAULT_LIMIT};
pub use error::{Error, Result};
pub use types::*;

/// ShopGuard version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default data directory
pub fn default_data_dir() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".shopguard")
}

/// Default daemon config path
pub fn default_config_path() -> std::path::PathBuf {
    default_data_dir().join("config.toml")
}

/// Default catalog path
pub fn default_catalog_path() -> std::path::PathBuf {
    default_data_dir().join("products.json")
}

/// Generate a new task id
pub fn new_task_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
