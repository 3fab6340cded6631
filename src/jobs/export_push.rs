use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info};
use reqwest::Client;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    aggregation::{ReportRange, Summarizer},
    db::ExportRow,
    settings::ReportingSettings,
};

const PUSH_TIMEOUT_SECS: u64 = 30;

/// Body posted to the collector. Delivery is at-least-once: the collector
/// deduplicates on `(device_id, id)`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBatch {
    pub batch_id: Uuid,
    pub device_id: String,
    pub window_from: DateTime<Utc>,
    pub window_to: DateTime<Utc>,
    pub activations: Vec<ExportRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushOutcome {
    pub batch_id: Uuid,
    pub rows: usize,
    pub status: Option<u16>,
}

/// Pushes recently completed activations to the configured collector.
pub struct ExportPusher {
    client: Client,
    endpoint: String,
    device_id: String,
    window: chrono::Duration,
    summarizer: Summarizer,
}

impl ExportPusher {
    /// `None` when no endpoint is configured.
    pub fn from_settings(settings: &ReportingSettings, summarizer: Summarizer) -> Result<Option<Self>> {
        let Some(endpoint) = settings.endpoint.clone().filter(|url| !url.trim().is_empty()) else {
            return Ok(None);
        };
        if settings.window_secs == 0 {
            bail!("reporting window_secs must be greater than zero");
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(PUSH_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client for export push")?;

        Ok(Some(Self {
            client,
            endpoint,
            device_id: settings.device_id.clone(),
            window: chrono::Duration::seconds(settings.window_secs as i64),
            summarizer,
        }))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Completed activations that started within the trailing window.
    pub async fn build_batch(&self, now: DateTime<Utc>) -> Result<ExportBatch> {
        let range = ReportRange::new(now - self.window, now, self.summarizer.offset())?;
        let activations = self.summarizer.export(range).await?;
        Ok(ExportBatch {
            batch_id: Uuid::new_v4(),
            device_id: self.device_id.clone(),
            window_from: range.from,
            window_to: range.to,
            activations,
        })
    }

    pub async fn push_once(&self, now: DateTime<Utc>) -> Result<PushOutcome> {
        let batch = self.build_batch(now).await?;
        if batch.activations.is_empty() {
            debug!("No completed activations to push in the last window");
            return Ok(PushOutcome {
                batch_id: batch.batch_id,
                rows: 0,
                status: None,
            });
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&batch)
            .send()
            .await
            .with_context(|| format!("failed to post batch {} to {}", batch.batch_id, self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "collector rejected batch {} with {}: {}",
                batch.batch_id,
                status,
                body
            );
        }

        info!(
            "Pushed {} activation(s) in batch {} ({})",
            batch.activations.len(),
            batch.batch_id,
            status
        );
        Ok(PushOutcome {
            batch_id: batch.batch_id,
            rows: batch.activations.len(),
            status: Some(status.as_u16()),
        })
    }
}
