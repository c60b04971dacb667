use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::config::Settings;
use crate::extract::ExtractedRecord;

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("enrichment request failed")]
    Transport(#[from] reqwest::Error),
    #[error("enrichment service returned {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("enrichment response was not usable: {0}")]
    InvalidResponse(String),
}

impl EnrichError {
    /// Transport failures and 429/5xx responses are worth retrying; anything
    /// else means the payload or the service contract is the problem.
    pub fn is_transient(&self) -> bool {
        match self {
            EnrichError::Transport(_) => true,
            EnrichError::Http { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            EnrichError::InvalidResponse(_) => false,
        }
    }
}

/// Client for the external trial analysis service.
pub struct EnrichClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl EnrichClient {
    pub fn new(
        endpoint: &str,
        model: &str,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("building enrichment HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    /// None when no enrichment endpoint is configured.
    pub fn from_settings(settings: &Settings) -> Result<Option<Self>> {
        let Some(endpoint) = settings.enrich_endpoint.as_deref() else {
            return Ok(None);
        };
        Ok(Some(Self::new(
            endpoint,
            &settings.enrich_model,
            settings.enrich_api_key.clone(),
            settings.enrich_timeout_secs,
        )?))
    }

    /// Submit one extracted record for analysis. Transient failures are
    /// retried with exponential backoff; the error returned after the last
    /// attempt keeps its classification so the caller can report it.
    pub async fn analyze(&self, record: &ExtractedRecord) -> Result<Value, EnrichError> {
        let url = format!("{}/analyze", self.endpoint);
        let body = serde_json::json!({ "model": self.model, "trial": record });

        let mut attempt = 0;
        loop {
            match self.call(&url, &body).await {
                Ok(doc) => return Ok(doc),
                Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                    warn!(
                        "Enrichment attempt {}/{} failed ({}), backing off {:.1}s",
                        attempt + 1,
                        MAX_RETRIES + 1,
                        e,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call(&self, url: &str, body: &Value) -> Result<Value, EnrichError> {
        let mut req = self.client.post(url).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let body = body.chars().take(200).collect();
            return Err(EnrichError::Http { status, body });
        }
        let doc: Value = resp
            .json()
            .await
            .map_err(|e| EnrichError::InvalidResponse(e.to_string()))?;
        if !doc.is_object() {
            return Err(EnrichError::InvalidResponse(
                "expected a JSON object".into(),
            ));
        }
        Ok(normalize(doc))
    }
}

/// Flatten the service's response envelope. Some deployments wrap the four
/// analysis sections under `analyzed_data` and name the validation block
/// `validation_results`; downstream mapping expects everything top-level
/// under stable keys.
pub fn normalize(mut doc: Value) -> Value {
    let Some(map) = doc.as_object_mut() else {
        return doc;
    };
    if let Some(Value::Object(inner)) = map.remove("analyzed_data") {
        for (k, v) in inner {
            map.entry(k).or_insert(v);
        }
    }
    if let Some(validation) = map.remove("validation_results") {
        map.entry("validation").or_insert(validation);
    }
    doc
}
