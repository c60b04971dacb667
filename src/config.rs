use anyhow::{Context, Result};
use config::{Config, Environment};
use serde::Deserialize;

/// Runtime settings. Every field can be overridden through the environment
/// with a `CT_` prefix, e.g. `CT_DB_PATH=/tmp/trials.sqlite`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: String,
    pub registry_base: String,
    pub raw_dir: String,
    pub out_dir: String,
    /// Analysis service base URL. When unset, the pipeline stores
    /// extraction-only records.
    pub enrich_endpoint: Option<String>,
    pub enrich_model: String,
    pub enrich_api_key: Option<String>,
    pub enrich_timeout_secs: u64,
}

pub fn load() -> Result<Settings> {
    let cfg = Config::builder()
        .set_default("db_path", "data/trials.sqlite")?
        .set_default("registry_base", "https://clinicaltrials.gov/api/v2")?
        .set_default("raw_dir", "data/raw")?
        .set_default("out_dir", "data/out")?
        .set_default("enrich_model", "gpt-4.1")?
        .set_default("enrich_timeout_secs", 120_i64)?
        .add_source(Environment::with_prefix("CT"))
        .build()
        .context("building configuration")?;
    cfg.try_deserialize().context("invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load() {
        let s = load().unwrap();
        assert_eq!(s.registry_base, "https://clinicaltrials.gov/api/v2");
        assert!(s.enrich_timeout_secs > 0);
    }
}
