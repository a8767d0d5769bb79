use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::batch::{DEFAULT_DOWNLOAD_CONCURRENCY, DEFAULT_FACTS_URL};
use crate::error::HarvestError;
use crate::fetch::RetryPolicy;
use crate::resolver::DEFAULT_SEARCH_CONCURRENCY;
use crate::search::DEFAULT_SEARCH_URL;
use crate::storage::FsObjectStore;
use crate::tiger::{DEFAULT_TIGER_URL, DEFAULT_TIGER_YEAR};

pub const DEFAULT_CONFIG_FILE: &str = "geofacts.json";
pub const DEFAULT_DEST_PREFIX: &str = "quickfacts-run";
pub const DEFAULT_REFERENCE_KEY: &str = "reference/entities.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub search_url: Option<String>,
    #[serde(default)]
    pub facts_url: Option<String>,
    #[serde(default)]
    pub storage_root: Option<String>,
    #[serde(default)]
    pub dest_prefix: Option<String>,
    #[serde(default)]
    pub reference_key: Option<String>,
    #[serde(default)]
    pub search_concurrency: Option<usize>,
    #[serde(default)]
    pub download_concurrency: Option<usize>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryEntry>,
    #[serde(default)]
    pub tiger_url: Option<String>,
    #[serde(default)]
    pub tiger_year: Option<String>,
    #[serde(default)]
    pub download_reference_files: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetryEntry {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub min_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct HarvestConfig {
    pub search_url: Url,
    pub facts_url: Url,
    pub storage_root: Utf8PathBuf,
    pub dest_prefix: String,
    pub reference_key: String,
    pub search_concurrency: usize,
    pub download_concurrency: usize,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub tiger_url: Url,
    pub tiger_year: String,
    pub download_reference_files: bool,
}

impl HarvestConfig {
    pub fn artifact_prefix(&self) -> String {
        crate::storage::join_key(&self.dest_prefix, "quickfacts")
    }
}

/// Values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub storage_root: Option<String>,
    pub dest_prefix: Option<String>,
    pub reference_key: Option<String>,
    pub search_concurrency: Option<usize>,
    pub download_concurrency: Option<usize>,
    pub download_reference_files: Option<bool>,
}

impl Overrides {
    /// `SCRAPE_SEARCH_CONCURRENCY`, `DL_CONCURRENCY` and `GEOFACTS_STORAGE_ROOT`.
    pub fn from_env() -> Result<Self, HarvestError> {
        Ok(Self {
            storage_root: env_value("GEOFACTS_STORAGE_ROOT"),
            dest_prefix: None,
            reference_key: None,
            search_concurrency: env_usize("SCRAPE_SEARCH_CONCURRENCY")?,
            download_concurrency: env_usize("DL_CONCURRENCY")?,
            download_reference_files: None,
        })
    }

    /// Fields set in `other` win.
    pub fn layered(self, other: Overrides) -> Overrides {
        Overrides {
            storage_root: other.storage_root.or(self.storage_root),
            dest_prefix: other.dest_prefix.or(self.dest_prefix),
            reference_key: other.reference_key.or(self.reference_key),
            search_concurrency: other.search_concurrency.or(self.search_concurrency),
            download_concurrency: other.download_concurrency.or(self.download_concurrency),
            download_reference_files: other
                .download_reference_files
                .or(self.download_reference_files),
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_usize(name: &str) -> Result<Option<usize>, HarvestError> {
    env_value(name)
        .map(|value| {
            value
                .parse::<usize>()
                .map_err(|_| HarvestError::ConfigValue(format!("{name}={value}")))
        })
        .transpose()
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>, overrides: Overrides) -> Result<HarvestConfig, HarvestError> {
        let config = match path {
            Some(path) => Self::read(PathBuf::from(path))?,
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::read(default_path)?
                } else {
                    Config::default()
                }
            }
        };
        Self::resolve_config(config, overrides)
    }

    fn read(path: PathBuf) -> Result<Config, HarvestError> {
        let content = fs::read_to_string(&path).map_err(|_| HarvestError::ConfigRead(path.clone()))?;
        serde_json::from_str(&content).map_err(|err| HarvestError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(config: Config, overrides: Overrides) -> Result<HarvestConfig, HarvestError> {
        let search_url = parse_url(config.search_url.as_deref().unwrap_or(DEFAULT_SEARCH_URL))?;
        let facts_url = parse_url(config.facts_url.as_deref().unwrap_or(DEFAULT_FACTS_URL))?;
        let tiger_url = parse_url(config.tiger_url.as_deref().unwrap_or(DEFAULT_TIGER_URL))?;
        let tiger_year = config
            .tiger_year
            .unwrap_or_else(|| DEFAULT_TIGER_YEAR.to_string());
        if tiger_year.len() != 4 || !tiger_year.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(HarvestError::ConfigValue(format!(
                "tiger_year must be a four digit year: {tiger_year}"
            )));
        }

        let storage_root = match overrides.storage_root.or(config.storage_root) {
            Some(root) => Utf8PathBuf::from(root),
            None => FsObjectStore::default_root()?,
        };

        let search_concurrency = positive(
            "search_concurrency",
            overrides
                .search_concurrency
                .or(config.search_concurrency)
                .unwrap_or(DEFAULT_SEARCH_CONCURRENCY),
        )?;
        let download_concurrency = positive(
            "download_concurrency",
            overrides
                .download_concurrency
                .or(config.download_concurrency)
                .unwrap_or(DEFAULT_DOWNLOAD_CONCURRENCY),
        )?;

        let defaults = RetryPolicy::default();
        let retry_entry = config.retry.unwrap_or_default();
        let retry = RetryPolicy {
            max_attempts: retry_entry.max_attempts.unwrap_or(defaults.max_attempts),
            min_delay: retry_entry
                .min_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_delay),
            max_delay: retry_entry
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
        };
        if retry.max_attempts == 0 {
            return Err(HarvestError::ConfigValue("retry.max_attempts must be at least 1".to_string()));
        }
        if retry.min_delay > retry.max_delay {
            return Err(HarvestError::ConfigValue(
                "retry.min_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }

        Ok(HarvestConfig {
            search_url,
            facts_url,
            storage_root,
            dest_prefix: overrides
                .dest_prefix
                .or(config.dest_prefix)
                .unwrap_or_else(|| DEFAULT_DEST_PREFIX.to_string()),
            reference_key: overrides
                .reference_key
                .or(config.reference_key)
                .unwrap_or_else(|| DEFAULT_REFERENCE_KEY.to_string()),
            search_concurrency,
            download_concurrency,
            request_timeout: Duration::from_secs(config.request_timeout_secs.unwrap_or(30)),
            retry,
            tiger_url,
            tiger_year,
            download_reference_files: overrides
                .download_reference_files
                .or(config.download_reference_files)
                .unwrap_or(true),
        })
    }
}

fn parse_url(value: &str) -> Result<Url, HarvestError> {
    Url::parse(value).map_err(|err| HarvestError::ConfigValue(format!("{value}: {err}")))
}

fn positive(name: &str, value: usize) -> Result<usize, HarvestError> {
    if value == 0 {
        return Err(HarvestError::ConfigValue(format!("{name} must be at least 1")));
    }
    Ok(value)
}
