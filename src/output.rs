use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;

use camino::Utf8Path;
use serde::Serialize;
use serde_json::Value;

use crate::dataset::{Attrs, CoordValues};
use crate::error::ClimError;
use crate::merge::MergedClimatology;
use crate::pipeline::{ExcludedGroup, ProgressEvent, ProgressSink, SearchResult};
use crate::snapshot::SnapshotStore;

#[derive(Debug, Clone, Serialize)]
pub struct CoordinateJson {
    pub dims: Vec<String>,
    pub values: Vec<Value>,
    pub attrs: Attrs,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariableJson {
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    /// Row-major values; missing cells are `null`.
    pub data: Vec<Option<f64>>,
    pub attrs: Attrs,
}

/// Serializable form of a merged climatology.
#[derive(Debug, Clone, Serialize)]
pub struct ClimatologyJson {
    pub models: Vec<String>,
    pub dims: BTreeMap<String, usize>,
    pub coords: BTreeMap<String, CoordinateJson>,
    pub data_vars: BTreeMap<String, VariableJson>,
    pub attrs: Attrs,
    pub excluded: Vec<ExcludedGroup>,
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

impl ClimatologyJson {
    pub fn new(climatology: &MergedClimatology, excluded: &[ExcludedGroup]) -> Self {
        let dataset = climatology.dataset();
        let coords = dataset
            .coords()
            .iter()
            .map(|(name, coord)| {
                let values = match coord.values() {
                    CoordValues::Numeric(values) => values
                        .iter()
                        .map(|value| finite(*value).map(Value::from).unwrap_or(Value::Null))
                        .collect(),
                    CoordValues::Labels(labels) => labels.iter().cloned().map(Value::from).collect(),
                    CoordValues::Time(axis) => match axis.to_timestamps() {
                        Ok(stamps) => stamps
                            .iter()
                            .map(|stamp| Value::from(stamp.format("%Y-%m-%dT%H:%M:%S").to_string()))
                            .collect(),
                        Err(_) => vec![Value::Null; axis.len()],
                    },
                };
                let json = CoordinateJson {
                    dims: coord.dims().to_vec(),
                    values,
                    attrs: coord.attrs().clone(),
                };
                (name.clone(), json)
            })
            .collect();
        let data_vars = dataset
            .data_vars()
            .iter()
            .map(|(name, var)| {
                let json = VariableJson {
                    dims: var.dims().to_vec(),
                    shape: var.data().shape().to_vec(),
                    data: var.data().iter().map(|value| finite(*value)).collect(),
                    attrs: var.attrs().clone(),
                };
                (name.clone(), json)
            })
            .collect();
        Self {
            models: climatology.models().to_vec(),
            dims: climatology.dims(),
            coords,
            data_vars,
            attrs: dataset.attrs().clone(),
            excluded: excluded.to_vec(),
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_climatology(result: &ClimatologyJson) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_search(result: &SearchResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn write_climatology(path: &Path, result: &ClimatologyJson) -> Result<(), ClimError> {
        let path = Utf8Path::from_path(path).ok_or_else(|| {
            ClimError::Filesystem(format!("output path {} is not UTF-8", path.display()))
        })?;
        let json = serde_json::to_vec_pretty(result)
            .map_err(|err| ClimError::Filesystem(err.to_string()))?;
        SnapshotStore::write_bytes_atomic(path, &json)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Forwards pipeline progress to the log.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => {
                tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message)
            }
            None => tracing::info!("{}", event.message),
        }
    }
}
