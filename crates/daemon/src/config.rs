//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use shopguard_common::{DisabledCheckoutPolicy, Error, Result, TestScope};

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// HTTP listen address
    pub listen: String,

    /// Data directory (catalog, reports)
    pub data_dir: PathBuf,

    /// Catalog file; `<data_dir>/products.json` when unset
    pub catalog: Option<PathBuf>,

    /// Worker process settings
    pub worker: WorkerConfig,

    /// Task lifecycle limits
    pub supervisor: SupervisorConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:5000".to_string(),
            data_dir: shopguard_common::default_data_dir(),
            catalog: None,
            worker: WorkerConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

/// How the worker is launched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker executable
    pub program: String,

    /// Arguments placed before the generated ones
    pub args: Vec<String>,

    pub headless: bool,

    /// Cart page override passed to the worker
    pub cart_url: Option<String>,

    pub disabled_checkout: DisabledCheckoutPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: "shopguard-worker".to_string(),
            args: Vec::new(),
            headless: true,
            cart_url: None,
            disabled_checkout: DisabledCheckoutPolicy::Fail,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Wall-clock budget for a single-product task
    pub single_timeout_secs: u64,

    /// Wall-clock budget for a batch task
    pub batch_timeout_secs: u64,

    /// Time between SIGTERM and SIGKILL on stop
    pub stop_grace_secs: u64,

    /// How long terminal tasks are kept
    pub retention_secs: u64,

    pub sweep_interval_secs: u64,

    /// Raw log lines kept per task
    pub max_log_lines: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            single_timeout_secs: 600,
            batch_timeout_secs: 3600,
            stop_grace_secs: 5,
            retention_secs: 3600,
            sweep_interval_secs: 300,
            max_log_lines: 5000,
        }
    }
}

impl SupervisorConfig {
    pub fn timeout_for(&self, scope: &TestScope) -> Duration {
        if scope.is_batch() {
            Duration::from_secs(self.batch_timeout_secs)
        } else {
            Duration::from_secs(self.single_timeout_secs)
        }
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl DaemonConfig {
    /// Load configuration from file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker.program.trim().is_empty() {
            return Err(Error::InvalidConfig("worker.program is empty".to_string()));
        }
        let limits = &self.supervisor;
        if limits.single_timeout_secs == 0 || limits.batch_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "supervisor timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the reports directory
    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }

    /// Get the catalog path
    pub fn catalog_path(&self) -> PathBuf {
        self.catalog
            .clone()
            .unwrap_or_else(|| self.data_dir.join("products.json"))
    }
}
