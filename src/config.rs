use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_CACHE_CAPACITY;
use crate::domain::LineFilter;
use crate::error::ResolverError;
use crate::retry::RetryPolicy;
use crate::sink::DEFAULT_BATCH_SIZE;
use crate::stream::DEFAULT_ID_FIELD;

pub const CONFIG_FILE: &str = "kira-sr.json";
pub const REFERENCE_FILE: &str = "anage_data.txt";
pub const CROSS_REF_FILES: [&str; 2] = ["pdb_chain_uniprot.tsv.gz", "pdb_chain_uniprot.tsv"];
pub const TAXONOMY_FILES: [&str; 2] = ["pdb_chain_taxonomy.tsv.gz", "pdb_chain_taxonomy.tsv"];

pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_WINDOW_SIZE: usize = 256;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub data_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub reference: Option<Utf8PathBuf>,
    #[serde(default)]
    pub index: Option<IndexConfig>,
    #[serde(default)]
    pub prefer_local_index: Option<bool>,
    #[serde(default)]
    pub id_field: Option<String>,
    #[serde(default)]
    pub cache_capacity: Option<usize>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub window_size: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    pub cross_refs: Utf8PathBuf,
    pub taxonomy: Utf8PathBuf,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub input: Utf8PathBuf,
    pub output: Utf8PathBuf,
    pub structured_output: Option<Utf8PathBuf>,
    pub append: bool,
    pub lines: Option<String>,
    pub organism: Option<String>,
    pub classification: Option<String>,
    pub reference: Option<Utf8PathBuf>,
    pub index: Option<IndexConfig>,
    pub remote_only: bool,
    pub id_field: Option<String>,
    pub cache_capacity: Option<usize>,
    pub batch_size: Option<usize>,
    pub workers: Option<usize>,
    pub retries: Option<u32>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexPaths {
    pub cross_refs: Utf8PathBuf,
    pub taxonomy: Utf8PathBuf,
}

impl IndexPaths {
    pub fn discover(dir: &Utf8Path) -> Option<Self> {
        let find = |names: &[&str]| {
            names
                .iter()
                .map(|name| dir.join(name))
                .find(|path| path.is_file())
        };
        Some(Self {
            cross_refs: find(&CROSS_REF_FILES[..])?,
            taxonomy: find(&TAXONOMY_FILES[..])?,
        })
    }
}

impl From<IndexConfig> for IndexPaths {
    fn from(value: IndexConfig) -> Self {
        Self {
            cross_refs: value.cross_refs,
            taxonomy: value.taxonomy,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input: Utf8PathBuf,
    pub output: Utf8PathBuf,
    pub structured_output: Option<Utf8PathBuf>,
    pub reference: Utf8PathBuf,
    pub index: Option<IndexPaths>,
    pub prefer_local_index: bool,
    pub append: bool,
    pub line_filter: LineFilter,
    pub id_field: String,
    pub organism: Option<String>,
    pub classification: Option<String>,
    pub cache_capacity: usize,
    pub batch_size: usize,
    pub workers: usize,
    pub window_size: usize,
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub aliases: BTreeMap<String, String>,
}

impl PipelineConfig {
    pub fn new(input: Utf8PathBuf, output: Utf8PathBuf, reference: Utf8PathBuf) -> Self {
        Self {
            input,
            output,
            structured_output: None,
            reference,
            index: None,
            prefer_local_index: true,
            append: false,
            line_filter: LineFilter::all(),
            id_field: DEFAULT_ID_FIELD.to_string(),
            organism: None,
            classification: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            workers: DEFAULT_WORKERS,
            window_size: DEFAULT_WINDOW_SIZE,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            aliases: BTreeMap::new(),
        }
    }
}

pub fn default_data_dir() -> Utf8PathBuf {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.cache_dir().join("kira-structure-resolver")).ok()
        })
        .unwrap_or_else(|| Utf8PathBuf::from(".kira-sr"))
}

#[derive(Debug, Clone, Serialize)]
pub struct DataAvailability {
    pub data_dir: Utf8PathBuf,
    pub reference: Option<Utf8PathBuf>,
    pub index: Option<IndexPaths>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(path: Option<&str>) -> Result<Config, ResolverError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ResolverError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| ResolverError::ConfigParse(err.to_string()))
    }

    pub fn data_dir(config: &Config) -> Utf8PathBuf {
        config.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn reference_path(config: &Config, override_path: Option<Utf8PathBuf>) -> Utf8PathBuf {
        override_path
            .or_else(|| config.reference.clone())
            .unwrap_or_else(|| Self::data_dir(config).join(REFERENCE_FILE))
    }

    pub fn index_paths(config: &Config, override_paths: Option<IndexConfig>) -> Option<IndexPaths> {
        override_paths
            .or_else(|| config.index.clone())
            .map(IndexPaths::from)
            .or_else(|| IndexPaths::discover(&Self::data_dir(config)))
    }

    pub fn available_data(config: &Config) -> DataAvailability {
        let reference = Self::reference_path(config, None);
        DataAvailability {
            data_dir: Self::data_dir(config),
            reference: reference.is_file().then_some(reference),
            index: Self::index_paths(config, None)
                .filter(|paths| paths.cross_refs.is_file() && paths.taxonomy.is_file()),
        }
    }

    pub fn retry_policy(config: &Config, retries: Option<u32>) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: retries
                .or(config.retry.max_attempts)
                .unwrap_or(defaults.max_attempts),
            base_delay: config
                .retry
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: config
                .retry
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
        }
    }

    pub fn resolve_config(
        config: Config,
        overrides: RunOverrides,
    ) -> Result<PipelineConfig, ResolverError> {
        let line_filter = overrides
            .lines
            .as_deref()
            .map(str::parse::<LineFilter>)
            .transpose()?
            .unwrap_or_else(LineFilter::all);

        let reference = Self::reference_path(&config, overrides.reference.clone());
        let index = if overrides.remote_only {
            None
        } else {
            Self::index_paths(&config, overrides.index.clone())
        };
        let retry = Self::retry_policy(&config, overrides.retries);

        let mut resolved = PipelineConfig::new(overrides.input, overrides.output, reference);
        resolved.structured_output = overrides.structured_output;
        resolved.index = index;
        resolved.prefer_local_index =
            !overrides.remote_only && config.prefer_local_index.unwrap_or(true);
        resolved.append = overrides.append;
        resolved.line_filter = line_filter;
        resolved.id_field = overrides
            .id_field
            .or(config.id_field)
            .unwrap_or_else(|| DEFAULT_ID_FIELD.to_string());
        resolved.organism = overrides.organism;
        resolved.classification = overrides.classification;
        resolved.cache_capacity = overrides
            .cache_capacity
            .or(config.cache_capacity)
            .unwrap_or(DEFAULT_CACHE_CAPACITY);
        resolved.batch_size = overrides
            .batch_size
            .or(config.batch_size)
            .unwrap_or(DEFAULT_BATCH_SIZE);
        resolved.workers = overrides
            .workers
            .or(config.workers)
            .unwrap_or(DEFAULT_WORKERS);
        resolved.window_size = config.window_size.unwrap_or(DEFAULT_WINDOW_SIZE);
        resolved.retry = retry;
        resolved.timeout = Duration::from_secs(
            overrides
                .timeout_secs
                .or(config.timeout_secs)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        );
        resolved.aliases = config.aliases;
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_config() {
        let overrides = RunOverrides {
            input: "in.jsonl.gz".into(),
            output: "out.tsv".into(),
            reference: Some("anage.tsv".into()),
            remote_only: true,
            ..RunOverrides::default()
        };
        let resolved = ConfigLoader::resolve_config(Config::default(), overrides).unwrap();
        assert_eq!(resolved.cache_capacity, 50_000);
        assert_eq!(resolved.batch_size, 500);
        assert_eq!(resolved.retry, RetryPolicy::default());
        assert_eq!(resolved.timeout, Duration::from_secs(30));
        assert_eq!(resolved.id_field, "entry_id");
        assert_eq!(resolved.line_filter, LineFilter::all());
        assert!(resolved.index.is_none());
        assert!(!resolved.prefer_local_index);
    }

    #[test]
    fn overrides_win_over_file() {
        let config: Config = serde_json::from_str(
            r#"{
                "cache_capacity": 10,
                "batch_size": 20,
                "retry": { "max_attempts": 5, "base_delay_ms": 100 },
                "index": { "cross_refs": "u.tsv", "taxonomy": "t.tsv" },
                "aliases": { "homo sapiens neanderthalensis": "homo sapiens" }
            }"#,
        )
        .unwrap();
        let overrides = RunOverrides {
            input: "in.jsonl".into(),
            output: "out.tsv".into(),
            batch_size: Some(7),
            lines: Some("10-".to_string()),
            ..RunOverrides::default()
        };
        let resolved = ConfigLoader::resolve_config(config, overrides).unwrap();
        assert_eq!(resolved.cache_capacity, 10);
        assert_eq!(resolved.batch_size, 7);
        assert_eq!(resolved.retry.max_attempts, 5);
        assert_eq!(resolved.retry.base_delay, Duration::from_millis(100));
        assert_eq!(resolved.index.unwrap().taxonomy, Utf8PathBuf::from("t.tsv"));
        assert!(!resolved.line_filter.contains(9));
        assert!(resolved.line_filter.contains(10));
        assert_eq!(resolved.aliases.len(), 1);
    }

    #[test]
    fn bad_line_filter_is_rejected() {
        let overrides = RunOverrides {
            lines: Some("5-2".to_string()),
            remote_only: true,
            ..RunOverrides::default()
        };
        let err = ConfigLoader::resolve_config(Config::default(), overrides).unwrap_err();
        assert!(matches!(err, ResolverError::InvalidLineFilter(_)));
    }
}
