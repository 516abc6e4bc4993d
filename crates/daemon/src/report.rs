//! Persisted test reports, one JSON file per finished task

use std::path::PathBuf;
use tracing::{debug, warn};

use shopguard_common::{Error, Report, ReportListing, Result};

#[derive(Debug, Clone)]
pub struct ReportStore {
    dir: PathBuf,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn save(&self, report: &Report) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&report.id)?;
        let content = serde_json::to_string_pretty(report)?;
        std::fs::write(&path, content)?;
        debug!("Saved report {} to {}", report.id, path.display());
        Ok(path)
    }

    pub fn load(&self, id: &str) -> Result<Report> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Err(Error::not_found("report", id));
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Newest first; unreadable files are skipped
    pub fn list(&self) -> Result<Vec<ReportListing>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut listings = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let report = std::fs::read_to_string(&path)
                .map_err(Error::from)
                .and_then(|c| Ok(serde_json::from_str::<Report>(&c)?));
            match report {
                Ok(report) => listings.push(ReportListing::from(&report)),
                Err(e) => warn!("Skipping report {}: {}", path.display(), e),
            }
        }

        listings.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(listings)
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(Error::not_found("report", id));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }
}
