use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::PANGEO_CMIP6_COLLECTION;
use crate::domain::{MODEL_COLUMN, Query, YearWindow};
use crate::error::ClimError;
use crate::executor::FailurePolicy;
use crate::pipeline::ClimatologyRequest;

pub const DEFAULT_CONFIG_FILE: &str = "climatology.json";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
const SUPPORTED_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub catalog: Option<String>,
    #[serde(default)]
    pub query: BTreeMap<String, FacetValues>,
    #[serde(default)]
    pub require_all_on: Option<Vec<String>>,
    #[serde(default)]
    pub years: Option<YearsEntry>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub policy: Option<FailurePolicy>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub snapshot: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FacetValues {
    Shorthand(String),
    List(Vec<String>),
}

impl FacetValues {
    fn into_vec(self) -> Vec<String> {
        match self {
            FacetValues::Shorthand(value) => vec![value],
            FacetValues::List(values) => values,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum YearsEntry {
    Shorthand(String),
    Detailed(YearsObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct YearsObject {
    pub start: i32,
    pub end: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionConfig {
    pub workers: usize,
    pub policy: FailurePolicy,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub catalog_url: String,
    pub query: Query,
    pub window: Option<YearWindow>,
    pub execution: ExecutionConfig,
    pub use_snapshot: bool,
}

impl ResolvedConfig {
    /// The request to run; fails when no year window was configured.
    pub fn request(&self) -> Result<ClimatologyRequest, ClimError> {
        let window = self.window.ok_or_else(|| {
            ClimError::InvalidQuery("no year window given; set `years` or pass --years".to_string())
        })?;
        self.query.validate()?;
        Ok(ClimatologyRequest {
            query: self.query.clone(),
            window,
        })
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(4)
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, ClimError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(ClimError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ClimError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| ClimError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    /// Like [`ConfigLoader::resolve`], but falls back to defaults when no
    /// path is given and `climatology.json` does not exist.
    pub fn resolve_or_default(path: Option<&str>) -> Result<ResolvedConfig, ClimError> {
        match Self::resolve(path) {
            Err(ClimError::MissingConfig) => Self::resolve_config(Config::default()),
            other => other,
        }
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, ClimError> {
        let schema_version = config.schema_version.unwrap_or(SUPPORTED_SCHEMA_VERSION);
        if schema_version != SUPPORTED_SCHEMA_VERSION {
            return Err(ClimError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let mut query = Query::new();
        for (name, values) in config.query {
            query.add_facet(&name, values.into_vec());
        }
        let required = config
            .require_all_on
            .unwrap_or_else(|| vec![MODEL_COLUMN.to_string()]);
        for column in &required {
            query = query.require_all_on(column);
        }

        let window = match config.years {
            None => None,
            Some(YearsEntry::Shorthand(value)) => Some(value.parse::<YearWindow>()?),
            Some(YearsEntry::Detailed(obj)) => Some(YearWindow::new(obj.start, obj.end)?),
        };

        let workers = config.workers.unwrap_or_else(default_workers);
        if workers == 0 {
            return Err(ClimError::ConfigParse("workers must be at least 1".to_string()));
        }

        Ok(ResolvedConfig {
            schema_version,
            catalog_url: config
                .catalog
                .unwrap_or_else(|| PANGEO_CMIP6_COLLECTION.to_string()),
            query,
            window,
            execution: ExecutionConfig {
                workers,
                policy: config.policy.unwrap_or_default(),
                timeout: Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            },
            use_snapshot: config.snapshot.unwrap_or(true),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_shorthand() {
        let config = Config {
            query: BTreeMap::from([(
                "experiment_id".to_string(),
                FacetValues::Shorthand("ssp585".to_string()),
            )]),
            years: Some(YearsEntry::Shorthand("2015-2020".to_string())),
            ..Config::default()
        };

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.catalog_url, PANGEO_CMIP6_COLLECTION);
        assert_eq!(resolved.query.facets()["experiment_id"], vec!["ssp585"]);
        assert_eq!(resolved.query.required_columns(), &["source_id".to_string()]);
        assert_eq!(resolved.window, Some(YearWindow::new(2015, 2020).unwrap()));
        assert_eq!(resolved.execution.policy, FailurePolicy::FailFast);
        assert!(resolved.use_snapshot);
    }
}
