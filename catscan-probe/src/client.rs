use std::time::Duration;
use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{Map, Value};
use shared::protocol::FIELD_QRDATA;
use shared::types::{RecordStatus, ScanRecord};

/// HTTP client for the desktop's ingestion endpoint
#[derive(Clone)]
pub struct IngestionClient {
    http: reqwest::Client,
}

impl IngestionClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http })
    }

    /// GET the liveness probe; true when the body reports `received`
    pub async fn is_live(&self, url: &str) -> bool {
        let record = match self.http.get(url).send().await {
            Ok(response) => response.json::<ScanRecord>().await,
            Err(e) => {
                tracing::debug!("{} unreachable: {}", url, e);
                return false;
            }
        };
        matches!(record, Ok(r) if r.status() == Some(RecordStatus::Received))
    }

    /// Probe every candidate concurrently; the first one to answer wins
    pub async fn first_live(&self, urls: &[String]) -> Option<String> {
        let mut probes: FuturesUnordered<_> = urls
            .iter()
            .map(|url| async move { (url, self.is_live(url).await) })
            .collect();

        while let Some((url, live)) = probes.next().await {
            if live {
                return Some(url.clone());
            }
        }
        None
    }

    /// POST one scan record and return the server's normalized copy.
    /// The body's `code` is authoritative, so the transport status is not checked.
    pub async fn send(&self, url: &str, qrdata: &str, extra: Map<String, Value>) -> Result<ScanRecord> {
        let mut payload = extra;
        payload.insert(FIELD_QRDATA.to_string(), Value::from(qrdata));

        self.http
            .post(url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Failed to post record to {}", url))?
            .json::<ScanRecord>()
            .await
            .context("Response was not a scan record")
    }
}
