use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::Arc;

use ndarray::ArrayD;
use serde::Deserialize;
use serde_json::Value;
use zarrs::array::{Array, ArrayError, DataType};
use zarrs::array_subset::ArraySubset;
use zarrs::filesystem::FilesystemStore;
use zarrs::storage::{ReadableStorage, ReadableStorageTraits, StoreKey};
use zarrs_http::HTTPStore;

use crate::calendar::{Calendar, TimeAxis, TimeUnits};
use crate::dataset::{Attrs, Coordinate, Dataset, TIME_DIM};
use crate::error::ClimError;
use crate::lazy::{ArraySource, LazyDataset, LazyVariable};

const GCS_PUBLIC_URL: &str = "https://storage.googleapis.com";
const CONSOLIDATED_KEY: &str = ".zmetadata";
const CF_ENCODING_ATTRS: [&str; 5] = [
    "_ARRAY_DIMENSIONS",
    "_FillValue",
    "missing_value",
    "scale_factor",
    "add_offset",
];

/// Opens one dataset by its storage locator. Coordinates are read eagerly,
/// data variables stay in storage.
pub trait DatasetStore: Send + Sync {
    fn open(&self, locator: &str) -> Result<LazyDataset, ClimError>;
}

/// Consolidated zarr v2 reader for `gs://`, `http(s)://`, `file://` and
/// plain filesystem locators.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZarrStore;

impl ZarrStore {
    pub fn new() -> Self {
        Self
    }

    pub fn storage_for(locator: &str) -> Result<ReadableStorage, ClimError> {
        let failed = |err: String| ClimError::Store(format!("{locator}: {err}"));
        let storage: ReadableStorage = match http_url(locator) {
            Some(url) => Arc::new(HTTPStore::new(&url).map_err(|err| failed(err.to_string()))?),
            None => {
                let path = locator.strip_prefix("file://").unwrap_or(locator);
                Arc::new(FilesystemStore::new(path).map_err(|err| failed(err.to_string()))?)
            }
        };
        Ok(storage)
    }

    /// Lists the arrays of a consolidated hierarchy and reads its coordinates.
    pub fn open_storage(storage: ReadableStorage) -> Result<LazyDataset, ClimError> {
        let key = StoreKey::new(CONSOLIDATED_KEY).map_err(|err| ClimError::Store(err.to_string()))?;
        let raw = storage
            .get(&key)
            .map_err(|err| ClimError::Store(format!("{CONSOLIDATED_KEY}: {err}")))?
            .ok_or_else(|| {
                ClimError::Store(format!("missing consolidated metadata {CONSOLIDATED_KEY}"))
            })?;
        let consolidated: ConsolidatedMetadata = serde_json::from_slice(&raw)
            .map_err(|err| ClimError::MalformedDataset(format!("{CONSOLIDATED_KEY}: {err}")))?;
        let metadata = consolidated.metadata;

        let arrays = metadata
            .keys()
            .filter_map(|key| key.strip_suffix("/.zarray"))
            .filter(|name| !name.contains('/'))
            .map(str::to_string)
            .collect::<Vec<_>>();
        let mut array_attrs = arrays
            .iter()
            .map(|name| (name.clone(), object_attrs(metadata.get(&format!("{name}/.zattrs")))))
            .collect::<BTreeMap<_, _>>();
        let coord_names = referenced_coordinates(&array_attrs);

        let mut dataset = Dataset::new().with_attrs(object_attrs(metadata.get(".zattrs")));
        let mut vars = Vec::new();
        for name in &arrays {
            let attrs = array_attrs.remove(name).unwrap_or_default();
            let dims = array_dimensions(name, &attrs)?;
            let zarr_fill = metadata
                .get(&format!("{name}/.zarray"))
                .and_then(|meta| meta.get("fill_value"))
                .and_then(fill_value);
            let array = Array::open(Arc::clone(&storage), &format!("/{name}"))
                .map_err(|err| ClimError::Store(format!("{name}: {err}")))?;
            let source = ZarrArray::new(name, array, &attrs, zarr_fill);
            let clean = attrs
                .iter()
                .filter(|(key, _)| !CF_ENCODING_ATTRS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect::<Attrs>();

            if name == TIME_DIM && dims.len() == 1 && dims[0] == TIME_DIM {
                let values = source.read(None)?;
                dataset.insert_coord(name, time_coordinate(&values, clean)?)?;
            } else if (dims.len() == 1 && dims[0] == *name) || coord_names.contains(name) {
                let values = source.read(None)?;
                dataset.insert_coord(name, Coordinate::numeric_nd(dims, values)?.with_attrs(clean))?;
            } else {
                let var = LazyVariable::new(dims, Arc::new(source) as Arc<dyn ArraySource>)?;
                vars.push((name.clone(), var.with_attrs(clean)));
            }
        }

        let mut lazy = LazyDataset::new(dataset);
        for (name, var) in vars {
            lazy.insert_var(&name, var)?;
        }
        Ok(lazy)
    }
}

impl DatasetStore for ZarrStore {
    fn open(&self, locator: &str) -> Result<LazyDataset, ClimError> {
        let dataset = Self::open_storage(Self::storage_for(locator)?)?;
        tracing::debug!(
            locator,
            coords = dataset.coords().len(),
            data_vars = dataset.data_vars().len(),
            "opened zarr store"
        );
        Ok(dataset)
    }
}

/// HTTPS base URL for remote locators; `gs://` buckets go through the
/// public endpoint.
fn http_url(locator: &str) -> Option<String> {
    if let Some(rest) = locator.strip_prefix("gs://") {
        return Some(format!("{GCS_PUBLIC_URL}/{}", rest.trim_end_matches('/')));
    }
    if locator.starts_with("https://") || locator.starts_with("http://") {
        return Some(locator.trim_end_matches('/').to_string());
    }
    None
}

#[derive(Debug, Deserialize)]
struct ConsolidatedMetadata {
    metadata: BTreeMap<String, Value>,
}

/// CF packing of one stored array.
#[derive(Debug, Clone, Default, PartialEq)]
struct CfEncoding {
    missing: Vec<f64>,
    scale: Option<f64>,
    offset: Option<f64>,
}

impl CfEncoding {
    /// Fill values are compared at the stored precision.
    fn new(attrs: &Attrs, zarr_fill: Option<f64>, single_precision: bool) -> Self {
        let mut missing = attr_numbers(attrs.get("_FillValue"));
        missing.extend(attr_numbers(attrs.get("missing_value")));
        missing.extend(zarr_fill);
        missing.retain(|value| !value.is_nan());
        if single_precision {
            for value in &mut missing {
                *value = f64::from(*value as f32);
            }
        }
        Self {
            missing,
            scale: attrs.get("scale_factor").and_then(Value::as_f64),
            offset: attrs.get("add_offset").and_then(Value::as_f64),
        }
    }

    /// Masks fill values to NaN and unpacks `scale_factor`/`add_offset`.
    fn decode(&self, values: &mut ArrayD<f64>) {
        let scale = self.scale.unwrap_or(1.0);
        let offset = self.offset.unwrap_or(0.0);
        values.mapv_inplace(|value| {
            if self.missing.contains(&value) {
                return f64::NAN;
            }
            value * scale + offset
        });
    }
}

/// One zarr array read through `zarrs`, decoded to `f64` on the way out.
struct ZarrArray {
    name: String,
    array: Array<dyn ReadableStorageTraits>,
    encoding: CfEncoding,
}

impl ZarrArray {
    fn new(
        name: &str,
        array: Array<dyn ReadableStorageTraits>,
        attrs: &Attrs,
        zarr_fill: Option<f64>,
    ) -> Self {
        let single_precision = matches!(array.data_type(), DataType::Float32);
        Self {
            name: name.to_string(),
            encoding: CfEncoding::new(attrs, zarr_fill, single_precision),
            array,
        }
    }

    fn retrieve(&self, subset: &ArraySubset) -> Result<ArrayD<f64>, ClimError> {
        let failed = |err: ArrayError| ClimError::Store(format!("{}: {err}", self.name));
        let array = &self.array;
        let values = match array.data_type() {
            DataType::Float64 => array.retrieve_array_subset_ndarray::<f64>(subset).map_err(failed)?,
            DataType::Float32 => array
                .retrieve_array_subset_ndarray::<f32>(subset)
                .map_err(failed)?
                .mapv(f64::from),
            DataType::Int64 => array
                .retrieve_array_subset_ndarray::<i64>(subset)
                .map_err(failed)?
                .mapv(|value| value as f64),
            DataType::Int32 => array
                .retrieve_array_subset_ndarray::<i32>(subset)
                .map_err(failed)?
                .mapv(f64::from),
            DataType::Int16 => array
                .retrieve_array_subset_ndarray::<i16>(subset)
                .map_err(failed)?
                .mapv(f64::from),
            DataType::Int8 => array
                .retrieve_array_subset_ndarray::<i8>(subset)
                .map_err(failed)?
                .mapv(f64::from),
            DataType::UInt64 => array
                .retrieve_array_subset_ndarray::<u64>(subset)
                .map_err(failed)?
                .mapv(|value| value as f64),
            DataType::UInt32 => array
                .retrieve_array_subset_ndarray::<u32>(subset)
                .map_err(failed)?
                .mapv(f64::from),
            DataType::UInt16 => array
                .retrieve_array_subset_ndarray::<u16>(subset)
                .map_err(failed)?
                .mapv(f64::from),
            DataType::UInt8 => array
                .retrieve_array_subset_ndarray::<u8>(subset)
                .map_err(failed)?
                .mapv(f64::from),
            other => {
                return Err(ClimError::MalformedDataset(format!(
                    "{}: unsupported data type {other:?}",
                    self.name
                )));
            }
        };
        Ok(values)
    }
}

impl ArraySource for ZarrArray {
    fn shape(&self) -> Vec<usize> {
        self.array.shape().iter().map(|&size| size as usize).collect()
    }

    fn read(&self, selection: Option<(usize, Range<usize>)>) -> Result<ArrayD<f64>, ClimError> {
        let ranges = self
            .array
            .shape()
            .iter()
            .enumerate()
            .map(|(axis, &size)| match &selection {
                Some((selected, range)) if *selected == axis => {
                    range.start as u64..range.end as u64
                }
                _ => 0..size,
            })
            .collect::<Vec<_>>();
        let subset = ArraySubset::new_with_ranges(&ranges);
        let mut values = self.retrieve(&subset)?;
        self.encoding.decode(&mut values);
        tracing::trace!(array = %self.name, ?ranges, "read zarr subset");
        Ok(values)
    }
}

fn fill_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => match text.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            _ => None,
        },
        _ => None,
    }
}

fn attr_numbers(value: Option<&Value>) -> Vec<f64> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(fill_value).collect(),
        Some(other) => fill_value(other).into_iter().collect(),
        None => Vec::new(),
    }
}

fn object_attrs(value: Option<&Value>) -> Attrs {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        _ => Attrs::new(),
    }
}

fn array_dimensions(name: &str, attrs: &Attrs) -> Result<Vec<String>, ClimError> {
    attrs
        .get("_ARRAY_DIMENSIONS")
        .and_then(Value::as_array)
        .and_then(|items| {
            items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
        })
        .ok_or_else(|| {
            ClimError::MalformedDataset(format!("{name} has no _ARRAY_DIMENSIONS attribute"))
        })
}

/// Names listed in `coordinates` or `bounds` attributes of any array.
fn referenced_coordinates(attrs: &BTreeMap<String, Attrs>) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for array in attrs.values() {
        for key in ["coordinates", "bounds"] {
            if let Some(Value::String(value)) = array.get(key) {
                names.extend(value.split_whitespace().map(str::to_string));
            }
        }
    }
    names
}

fn time_coordinate(values: &ArrayD<f64>, mut attrs: Attrs) -> Result<Coordinate, ClimError> {
    let units = attrs
        .remove("units")
        .and_then(|value| value.as_str().map(str::to_string))
        .ok_or_else(|| ClimError::TimeDecode("time variable has no units".to_string()))?;
    let calendar = match attrs.remove("calendar") {
        Some(Value::String(name)) => name.parse::<Calendar>()?,
        _ => Calendar::Standard,
    };
    let axis = TimeAxis::Encoded {
        calendar,
        units: units.parse::<TimeUnits>()?,
        offsets: values.iter().copied().collect(),
    };
    Ok(Coordinate::time(axis).with_attrs(attrs))
}

#[cfg(test)]
mod tests {
    use ndarray::IxDyn;

    use super::*;

    #[test]
    fn cf_encoding_masks_and_scales() {
        let mut values = ArrayD::from_shape_vec(IxDyn(&[3]), vec![1.0, -999.0, 3.0]).unwrap();
        let attrs = Attrs::from([
            ("_FillValue".to_string(), Value::from(-999.0)),
            ("scale_factor".to_string(), Value::from(2.0)),
            ("add_offset".to_string(), Value::from(1.0)),
        ]);
        CfEncoding::new(&attrs, None, false).decode(&mut values);
        assert_eq!(values[[0]], 3.0);
        assert!(values[[1]].is_nan());
        assert_eq!(values[[2]], 7.0);
    }

    #[test]
    fn single_precision_fill_matches_widened_values() {
        let attrs = Attrs::from([("_FillValue".to_string(), Value::from(1.0e20))]);
        let encoding = CfEncoding::new(&attrs, Some(1.0e20), true);
        let mut values = ArrayD::from_elem(IxDyn(&[2]), f64::from(1.0e20f32));
        values[[1]] = 5.0;
        encoding.decode(&mut values);
        assert!(values[[0]].is_nan());
        assert_eq!(values[[1]], 5.0);
    }

    #[test]
    fn remote_locators_map_to_https() {
        assert_eq!(
            http_url("gs://cmip6/CMIP6/ScenarioMIP/tas/").as_deref(),
            Some("https://storage.googleapis.com/cmip6/CMIP6/ScenarioMIP/tas")
        );
        assert_eq!(
            http_url("https://example.org/store.zarr").as_deref(),
            Some("https://example.org/store.zarr")
        );
        assert_eq!(http_url("file:///data/store.zarr"), None);
        assert_eq!(http_url("/data/store.zarr"), None);
    }

    #[test]
    fn dimensions_come_from_the_xarray_attribute() {
        let attrs = Attrs::from([(
            "_ARRAY_DIMENSIONS".to_string(),
            serde_json::json!(["time", "lat"]),
        )]);
        assert_eq!(array_dimensions("tas", &attrs).unwrap(), vec!["time", "lat"]);
        assert!(array_dimensions("tas", &Attrs::new()).is_err());
    }
}
