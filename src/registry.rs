use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use regex::Regex;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;

static NCT_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^NCT\d{8}$").unwrap());

/// Uppercase and validate a trial identifier. Runs before any network call
/// so a malformed id never costs a request.
pub fn validate_nct_id(raw: &str) -> Result<String> {
    let id = raw.trim();
    if !NCT_ID_RE.is_match(id) {
        bail!(
            "invalid trial identifier '{}' (expected NCT followed by 8 digits)",
            raw
        );
    }
    Ok(id.to_uppercase())
}

#[derive(Debug, Error)]
enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("registry returned {0}")]
    Status(StatusCode),
}

impl FetchError {
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(_) => true,
            FetchError::Status(s) => *s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error(),
        }
    }
}

/// Client for the trial registry's study API.
pub struct RegistryClient {
    client: reqwest::Client,
    base: String,
}

impl RegistryClient {
    pub fn new(base: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("building registry HTTP client")?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    /// Download one study document, returning the registry's JSON as-is.
    pub async fn fetch_study(&self, raw_id: &str) -> Result<Value> {
        let id = validate_nct_id(raw_id)?;
        let url = format!("{}/studies/{}", self.base, id);

        let mut attempt = 0;
        loop {
            match self.fetch_once(&url).await {
                Ok(doc) => return Ok(doc),
                Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                    warn!(
                        "Registry fetch for {} failed (attempt {}/{}, {}), backing off {:.1}s",
                        id,
                        attempt + 1,
                        MAX_RETRIES + 1,
                        e,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e).with_context(|| format!("fetching study {}", id)),
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Value, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_and_uppercases_valid_ids() {
        assert_eq!(validate_nct_id("nct00001372").unwrap(), "NCT00001372");
        assert_eq!(validate_nct_id("  NCT12345678  ").unwrap(), "NCT12345678");
    }

    #[test]
    fn rejects_malformed_ids() {
        let bad = [
            "",
            "NCT1234",
            "NCT123456789",
            "NCT1234567X",
            "12345678",
            "NCT 0000137",
        ];
        for id in bad {
            assert!(validate_nct_id(id).is_err(), "{:?} should be invalid", id);
        }
    }

    #[test]
    fn status_classes_drive_retry() {
        assert!(FetchError::Status(StatusCode::TOO_MANY_REQUESTS).is_transient());
        assert!(FetchError::Status(StatusCode::BAD_GATEWAY).is_transient());
        assert!(!FetchError::Status(StatusCode::NOT_FOUND).is_transient());
    }
}
