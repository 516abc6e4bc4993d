//! HTTP client for the ShopGuard daemon

use anyhow::{anyhow, Context, Result};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use shopguard_common::{
    Catalog, ConflictResponse, Report, ReportListing, StopResponse, SubmitResponse, TaskSnapshot,
    TaskSummary, TestRequest,
};

/// Outcome of a submission
#[derive(Debug)]
pub enum Submitted {
    Accepted(SubmitResponse),
    /// Another task holds the browser
    Conflict(ConflictResponse),
}

/// Client for the daemon's HTTP API
pub struct ApiClient {
    base: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(server: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base: server.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn send(&self, method: &str, path: &str, request: RequestBuilder) -> Result<Response> {
        debug!("{} {}", method, path);
        match request.send().await {
            Ok(response) => {
                debug!("{} {} -> {}", method, path, response.status());
                Ok(response)
            }
            Err(e) => {
                warn!("{} {} failed: {}", method, path, e);
                Err(e).with_context(|| format!("cannot reach daemon at {}", self.base))
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send("GET", path, self.http.get(self.url(path))).await?;
        decode(response).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send("POST", path, self.http.post(self.url(path))).await?;
        decode(response).await
    }

    /// Check if the daemon is healthy
    pub async fn health(&self) -> Result<serde_json::Value> {
        self.get("/api/health").await
    }

    pub async fn submit(&self, request: &TestRequest) -> Result<Submitted> {
        let path = "/api/tests";
        let response = self
            .send("POST", path, self.http.post(self.url(path)).json(request))
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Ok(Submitted::Conflict(response.json().await?));
        }
        Ok(Submitted::Accepted(decode(response).await?))
    }

    pub async fn task(&self, id: &str) -> Result<TaskSnapshot> {
        self.get(&format!("/api/tests/{}", id)).await
    }

    pub async fn tasks(&self) -> Result<Vec<TaskSummary>> {
        self.get("/api/tests").await
    }

    pub async fn stop(&self, id: &str) -> Result<StopResponse> {
        self.post(&format!("/api/tests/{}/stop", id)).await
    }

    pub async fn products(&self) -> Result<Catalog> {
        self.get("/api/products").await
    }

    pub async fn reports(&self) -> Result<Vec<ReportListing>> {
        self.get("/api/reports").await
    }

    pub async fn report(&self, id: &str) -> Result<Report> {
        self.get(&format!("/api/reports/{}", id)).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let body = response.text().await.unwrap_or_default();
    debug!("Daemon returned {}: {}", status, body);
    Err(anyhow!("{} ({})", error_message(&body), status))
}

/// The `error` field of a daemon error body, or the raw body
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| {
            let body = body.trim();
            if body.is_empty() {
                "request failed".to_string()
            } else {
                body.to_string()
            }
        })
}
