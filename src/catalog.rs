use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flate2::read::GzDecoder;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::domain::{EXPERIMENT_COLUMN, MODEL_COLUMN, Query};
use crate::error::ClimError;
use crate::snapshot::SnapshotStore;

pub const PANGEO_CMIP6_COLLECTION: &str =
    "https://storage.googleapis.com/cmip6/pangeo-cmip6.json";
pub const DEFAULT_LOCATOR_COLUMN: &str = "zstore";

/// One discoverable dataset instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRow {
    pub model: String,
    pub experiment: String,
    pub locator: String,
    pub facets: BTreeMap<String, String>,
}

impl CatalogRow {
    pub fn new(model: &str, experiment: &str, locator: &str) -> Self {
        let facets = BTreeMap::from([
            (MODEL_COLUMN.to_string(), model.to_string()),
            (EXPERIMENT_COLUMN.to_string(), experiment.to_string()),
            (DEFAULT_LOCATOR_COLUMN.to_string(), locator.to_string()),
        ]);
        Self {
            model: model.to_string(),
            experiment: experiment.to_string(),
            locator: locator.to_string(),
            facets,
        }
    }

    pub fn with_facet(mut self, name: &str, value: &str) -> Self {
        self.facets.insert(name.to_string(), value.to_string());
        self
    }

    pub fn facet(&self, name: &str) -> Option<&str> {
        self.facets.get(name).map(String::as_str)
    }
}

pub trait CatalogClient: Send + Sync {
    fn search(&self, query: &Query) -> Result<Vec<CatalogRow>, ClimError>;
}

/// Applies facet filters and the `require_all_on` constraint to `rows`,
/// preserving their order.
pub fn filter_rows(rows: &[CatalogRow], query: &Query) -> Vec<CatalogRow> {
    let matching = rows
        .iter()
        .filter(|row| {
            query.facets().iter().all(|(name, values)| {
                row.facet(name)
                    .map(|value| values.iter().any(|wanted| wanted == value))
                    .unwrap_or(false)
            })
        })
        .collect::<Vec<_>>();

    let required = query.required_columns();
    if required.is_empty() {
        return matching.into_iter().cloned().collect();
    }

    let group_of = |row: &CatalogRow| {
        required
            .iter()
            .map(|column| row.facet(column).unwrap_or_default().to_string())
            .collect::<Vec<_>>()
    };
    let mut seen = BTreeMap::<Vec<String>, BTreeMap<&str, BTreeSet<&str>>>::new();
    for row in &matching {
        let facets = seen.entry(group_of(row)).or_default();
        for name in query.facets().keys() {
            if let Some(value) = row.facet(name) {
                facets.entry(name.as_str()).or_default().insert(value);
            }
        }
    }
    let complete = seen
        .into_iter()
        .filter(|(_, found)| {
            query
                .facets()
                .iter()
                .filter(|(name, _)| !required.contains(name))
                .all(|(name, wanted)| {
                    found
                        .get(name.as_str())
                        .map(|values| wanted.iter().all(|w| values.contains(w.as_str())))
                        .unwrap_or(false)
                })
        })
        .map(|(key, _)| key)
        .collect::<BTreeSet<_>>();

    matching
        .into_iter()
        .filter(|row| complete.contains(&group_of(row)))
        .cloned()
        .collect()
}

/// Parses a catalog table. `locator_column` names the asset column.
pub fn parse_catalog_csv<R: Read>(
    reader: R,
    locator_column: &str,
) -> Result<Vec<CatalogRow>, ClimError> {
    let mut reader = csv::Reader::from_reader(reader);
    let headers = reader
        .headers()
        .map_err(|err| ClimError::CatalogUnavailable(err.to_string()))?
        .clone();
    for column in [MODEL_COLUMN, EXPERIMENT_COLUMN, locator_column] {
        if !headers.iter().any(|header| header == column) {
            return Err(ClimError::CatalogUnavailable(format!(
                "catalog table has no {column} column"
            )));
        }
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| ClimError::CatalogUnavailable(err.to_string()))?;
        let facets = headers
            .iter()
            .zip(record.iter())
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect::<BTreeMap<_, _>>();
        let column = |name: &str| facets.get(name).cloned().unwrap_or_default();
        rows.push(CatalogRow {
            model: column(MODEL_COLUMN),
            experiment: column(EXPERIMENT_COLUMN),
            locator: column(locator_column),
            facets,
        });
    }
    Ok(rows)
}

/// Catalog over a fixed set of rows, e.g. a local snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    rows: Vec<CatalogRow>,
}

impl StaticCatalog {
    pub fn new(rows: Vec<CatalogRow>) -> Self {
        Self { rows }
    }

    pub fn from_csv_path(path: &Path, locator_column: &str) -> Result<Self, ClimError> {
        let file = std::fs::File::open(path).map_err(|err| {
            ClimError::CatalogUnavailable(format!("open {}: {err}", path.display()))
        })?;
        let rows = if path.extension().map(|ext| ext == "gz").unwrap_or(false) {
            parse_catalog_csv(GzDecoder::new(file), locator_column)?
        } else {
            parse_catalog_csv(file, locator_column)?
        };
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[CatalogRow] {
        &self.rows
    }
}

impl CatalogClient for StaticCatalog {
    fn search(&self, query: &Query) -> Result<Vec<CatalogRow>, ClimError> {
        query.validate()?;
        Ok(filter_rows(&self.rows, query))
    }
}

#[derive(Debug, Deserialize)]
struct EsmCollection {
    catalog_file: String,
    #[serde(default)]
    assets: Option<EsmAssets>,
}

#[derive(Debug, Deserialize)]
struct EsmAssets {
    column_name: String,
}

/// Reads an ESM collection description and its CSV table over HTTP.
pub struct EsmCatalogClient {
    client: Client,
    collection_url: String,
    snapshot: Option<SnapshotStore>,
    rows: Mutex<Option<Arc<Vec<CatalogRow>>>>,
}

impl EsmCatalogClient {
    pub fn new(collection_url: &str, timeout: Duration) -> Result<Self, ClimError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("cmip-clim/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ClimError::CatalogUnavailable(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| ClimError::CatalogUnavailable(err.to_string()))?;
        Ok(Self {
            client,
            collection_url: collection_url.to_string(),
            snapshot: None,
            rows: Mutex::new(None),
        })
    }

    pub fn with_snapshot(mut self, snapshot: SnapshotStore) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn collection_url(&self) -> &str {
        &self.collection_url
    }

    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, ClimError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| ClimError::CatalogUnavailable(format!("{url}: {err}")))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(ClimError::CatalogUnavailable(format!(
                "{url} returned status {status}"
            )));
        }
        let bytes = response
            .bytes()
            .map_err(|err| ClimError::CatalogUnavailable(format!("{url}: {err}")))?;
        Ok(bytes.to_vec())
    }

    fn resolve_catalog_url(&self, catalog_file: &str) -> String {
        if catalog_file.contains("://") {
            return catalog_file.to_string();
        }
        match self.collection_url.rsplit_once('/') {
            Some((base, _)) => format!("{base}/{catalog_file}"),
            None => catalog_file.to_string(),
        }
    }

    fn load_rows(&self) -> Result<Arc<Vec<CatalogRow>>, ClimError> {
        let mut guard = self
            .rows
            .lock()
            .map_err(|_| ClimError::CatalogUnavailable("catalog cache poisoned".to_string()))?;
        if let Some(rows) = guard.as_ref() {
            return Ok(Arc::clone(rows));
        }

        let collection: EsmCollection = serde_json::from_slice(&self.get_bytes(&self.collection_url)?)
            .map_err(|err| {
                ClimError::CatalogUnavailable(format!("invalid collection description: {err}"))
            })?;
        let locator_column = collection
            .assets
            .map(|assets| assets.column_name)
            .unwrap_or_else(|| DEFAULT_LOCATOR_COLUMN.to_string());
        let catalog_url = self.resolve_catalog_url(&collection.catalog_file);

        let cached = match &self.snapshot {
            Some(snapshot) => snapshot.read(&catalog_url)?,
            None => None,
        };
        let table = match cached {
            Some(table) => {
                tracing::debug!(url = %catalog_url, "using catalog snapshot");
                table
            }
            None => {
                tracing::info!(url = %catalog_url, "downloading catalog table");
                let bytes = self.get_bytes(&catalog_url)?;
                let table = if catalog_url.ends_with(".gz") {
                    let mut text = Vec::new();
                    GzDecoder::new(bytes.as_slice())
                        .read_to_end(&mut text)
                        .map_err(|err| ClimError::CatalogUnavailable(err.to_string()))?;
                    text
                } else {
                    bytes
                };
                if let Some(snapshot) = &self.snapshot {
                    snapshot.write(&catalog_url, &table)?;
                }
                table
            }
        };

        let rows = Arc::new(parse_catalog_csv(table.as_slice(), &locator_column)?);
        tracing::debug!(rows = rows.len(), "catalog loaded");
        *guard = Some(Arc::clone(&rows));
        Ok(rows)
    }
}

impl CatalogClient for EsmCatalogClient {
    fn search(&self, query: &Query) -> Result<Vec<CatalogRow>, ClimError> {
        query.validate()?;
        let rows = self.load_rows()?;
        Ok(filter_rows(&rows, query))
    }
}
