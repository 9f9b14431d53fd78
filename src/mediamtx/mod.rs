//! MediaMTX control-API client
//!
//! ## Responsibilities
//!
//! - Health probing of the control endpoint
//! - Listing configured paths with their transcoder commands
//! - Creating and deleting paths
//!
//! Paths are created with `runOnInit` so MediaMTX owns the transcoder
//! process lifecycle; this daemon never forks ffmpeg itself.

use crate::error::{Error, Result};
use crate::stream_supervisor::{StreamBackend, StreamPath};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Default control endpoint.
pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:9997";
/// RTSP ingest root advertised to transcoder commands.
pub const RTSP_INGEST_BASE: &str = "rtsp://127.0.0.1:8554";

pub struct MediaMtxClient {
    client: reqwest::Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct PathConfList {
    #[serde(default)]
    items: Vec<PathConf>,
}

#[derive(Debug, Deserialize)]
struct PathConf {
    name: String,
    #[serde(rename = "runOnInit", default)]
    run_on_init: Option<String>,
}

impl MediaMtxClient {
    pub fn new(api_base: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(Error::Protocol(format!("HTTP {status}: {body}")))
        }
    }
}

#[async_trait]
impl StreamBackend for MediaMtxClient {
    async fn health(&self) -> bool {
        let url = format!("{}/v3/config/global/get", self.api_base);
        let probe = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await;

        matches!(probe, Ok(resp) if resp.status().is_success())
    }

    async fn list_paths(&self) -> Result<Vec<StreamPath>> {
        let url = format!("{}/v3/config/paths/list", self.api_base);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Error::from_http)?;
        let resp = Self::check_status(resp).await?;

        let list: PathConfList = resp.json().await.map_err(Error::from_http)?;

        Ok(list
            .items
            .into_iter()
            .map(|item| StreamPath {
                name: item.name,
                command: item.run_on_init.unwrap_or_default(),
            })
            .collect())
    }

    async fn create_path(&self, name: &str, command: &str) -> Result<()> {
        let url = format!("{}/v3/config/paths/add/{}", self.api_base, name);
        let payload = json!({
            "name": name,
            "source": "publisher",
            "runOnInit": command,
            "runOnInitRestart": true,
        });

        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(Error::from_http)?;
        Self::check_status(resp).await?;

        tracing::info!(path = name, "Stream path created");
        Ok(())
    }

    async fn delete_path(&self, name: &str) -> Result<()> {
        let url = format!("{}/v3/config/paths/delete/{}", self.api_base, name);
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(Error::from_http)?;

        // Deleting an already-absent path converges to the same state
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check_status(resp).await?;

        tracing::info!(path = name, "Stream path deleted");
        Ok(())
    }
}
