//! Moonraker API client
//!
//! ## Responsibilities
//!
//! - Health probing (`/server/info`)
//! - Webcam listing, creation, rename and deletion keyed by UID
//!
//! The environment is cooperative: Moonraker runs on loopback or LAN with
//! authentication disabled for local clients.

use crate::error::{Error, Result};
use crate::registration_sync::{RegistryBackend, WebcamRegistration};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

/// Default API endpoint.
pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:7125";

pub struct MoonrakerClient {
    client: reqwest::Client,
    api_base: String,
}

impl MoonrakerClient {
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
impl RegistryBackend for MoonrakerClient {
    async fn health(&self) -> bool {
        let url = format!("{}/server/info", self.api_base);
        let probe = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await;

        matches!(probe, Ok(resp) if resp.status().is_success())
    }

    async fn list_webcams(&self) -> Result<Vec<WebcamRegistration>> {
        let url = format!("{}/server/webcams/list", self.api_base);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Error::from_http)?;
        let resp = Self::check_status(resp).await?;

        let body: serde_json::Value = resp.json().await.map_err(Error::from_http)?;
        let webcams = body
            .get("result")
            .and_then(|result| result.get("webcams"))
            .and_then(|webcams| webcams.as_array())
            .ok_or_else(|| Error::Protocol("webcam list missing 'result.webcams'".to_string()))?;

        Ok(webcams
            .iter()
            .filter_map(|webcam| {
                Some(WebcamRegistration {
                    uid: webcam.get("uid")?.as_str()?.to_string(),
                    name: webcam.get("name")?.as_str()?.to_string(),
                    stream_url: webcam
                        .get("stream_url")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    snapshot_url: webcam
                        .get("snapshot_url")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    service: webcam
                        .get("service")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect())
    }

    async fn create_webcam(&self, registration: &WebcamRegistration) -> Result<()> {
        let url = format!("{}/server/webcams/item", self.api_base);
        let payload = json!({
            "uid": registration.uid,
            "name": registration.name,
            "location": "printer",
            "service": registration.service,
            "enabled": true,
            "icon": "mdiWebcam",
            "target_fps": 30,
            "target_fps_idle": 5,
            "stream_url": registration.stream_url,
            "snapshot_url": registration.snapshot_url,
            "aspect_ratio": "16:9",
        });

        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(Error::from_http)?;
        Self::check_status(resp).await?;

        tracing::info!(uid = %registration.uid, name = %registration.name, "Webcam registered");
        Ok(())
    }

    async fn rename_webcam(&self, uid: &str, name: &str) -> Result<()> {
        let url = format!("{}/server/webcams/item", self.api_base);
        let resp = self
            .client
            .post(&url)
            .query(&[("uid", uid)])
            .json(&json!({ "name": name }))
            .send()
            .await
            .map_err(Error::from_http)?;
        Self::check_status(resp).await?;

        tracing::info!(uid = %uid, name = %name, "Webcam renamed");
        Ok(())
    }

    async fn delete_webcam(&self, uid: &str) -> Result<()> {
        let url = format!("{}/server/webcams/item", self.api_base);
        let resp = self
            .client
            .delete(&url)
            .query(&[("uid", uid)])
            .send()
            .await
            .map_err(Error::from_http)?;

        // An absent webcam is the state we wanted
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check_status(resp).await?;

        tracing::info!(uid = %uid, "Webcam unregistered");
        Ok(())
    }
}
