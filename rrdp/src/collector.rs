//! Client side of the statistics collector a local plugin registers with.
use crate::payload::ProtocolVersion;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Collector service that schedules and polls local plugins.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Collector: Send + Sync {
    /// Path of the file plugin `uid` must publish its samples to.
    async fn get_path(&self, uid: &str) -> Result<PathBuf>;

    /// Registers (or re-registers) `uid` and returns the number of seconds
    /// until the collector next reads its file.
    async fn register(
        &self,
        uid: &str,
        interval: Duration,
        protocol: ProtocolVersion,
    ) -> Result<f64>;

    async fn deregister(&self, uid: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct PathResponse {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
struct RegisterRequest {
    interval_secs: u64,
    protocol: ProtocolVersion,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    next_reading: f64,
}

/// Collector reached over HTTP with JSON bodies.
///
/// * `GET    {base}/plugins/{uid}/path`     -> `{"path": ...}`
/// * `POST   {base}/plugins/{uid}/register` -> `{"next_reading": secs}`
/// * `DELETE {base}/plugins/{uid}`
pub struct HttpCollector {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCollector {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .timeout(timeout)
            .build()
            .with_context(|| "Failed to build collector client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, uid: &str, suffix: &str) -> String {
        format!("{}/plugins/{}{}", self.base_url, uid, suffix)
    }
}

#[async_trait]
impl Collector for HttpCollector {
    async fn get_path(&self, uid: &str) -> Result<PathBuf> {
        let response: PathResponse = self
            .client
            .get(self.url(uid, "/path"))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .with_context(|| format!("Failed to get sample path for {}", uid))?
            .json()
            .await
            .with_context(|| "Malformed path response")?;
        Ok(response.path)
    }

    async fn register(
        &self,
        uid: &str,
        interval: Duration,
        protocol: ProtocolVersion,
    ) -> Result<f64> {
        let request = RegisterRequest {
            interval_secs: interval.as_secs(),
            protocol,
        };
        let response: RegisterResponse = self
            .client
            .post(self.url(uid, "/register"))
            .json(&request)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .with_context(|| format!("Failed to register {}", uid))?
            .json()
            .await
            .with_context(|| "Malformed register response")?;
        Ok(response.next_reading)
    }

    async fn deregister(&self, uid: &str) -> Result<()> {
        self.client
            .delete(self.url(uid, ""))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .with_context(|| format!("Failed to deregister {}", uid))?;
        Ok(())
    }
}
