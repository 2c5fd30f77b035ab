#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use ndarray::{ArrayD, IxDyn};

use cmip_climatology::calendar::{TimeAxis, timestamp};
use cmip_climatology::dataset::{Coordinate, Dataset, Variable};
use cmip_climatology::error::ClimError;
use cmip_climatology::lazy::LazyDataset;
use cmip_climatology::pipeline::{ProgressEvent, ProgressSink};
use cmip_climatology::zarr::DatasetStore;

#[derive(Default)]
pub struct MemoryStore {
    datasets: HashMap<String, Dataset>,
    pub opened: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn with(mut self, locator: &str, dataset: Dataset) -> Self {
        self.datasets.insert(locator.to_string(), dataset);
        self
    }
}

impl DatasetStore for MemoryStore {
    fn open(&self, locator: &str) -> Result<LazyDataset, ClimError> {
        self.opened.lock().unwrap().push(locator.to_string());
        self.datasets
            .get(locator)
            .cloned()
            .map(LazyDataset::from)
            .ok_or_else(|| ClimError::Store(format!("{locator} not found")))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub messages: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

/// One time step per year, on 1 July.
pub fn annual_axis(first: i32, last: i32) -> TimeAxis {
    TimeAxis::Timestamps(
        (first..=last)
            .map(|year| timestamp(year, 7, 1).unwrap())
            .collect(),
    )
}

/// Yearly `tas(time, lat, lon)` where every cell of step `n` holds `value(year)`,
/// plus `time_bnds` and `lat_bnds` bounds variables.
pub fn annual_dataset(
    first: i32,
    last: i32,
    lat: Vec<f64>,
    lon: Vec<f64>,
    value: impl Fn(i32) -> f64,
) -> Dataset {
    let steps = (last - first + 1) as usize;
    let (nlat, nlon) = (lat.len(), lon.len());
    let tas = ArrayD::from_shape_fn(IxDyn(&[steps, nlat, nlon]), |index| {
        value(first + index[0] as i32)
    });
    Dataset::new()
        .with_coord("time", Coordinate::time(annual_axis(first, last)))
        .unwrap()
        .with_coord("lat", Coordinate::numeric("lat", lat))
        .unwrap()
        .with_coord("lon", Coordinate::numeric("lon", lon))
        .unwrap()
        .with_var("tas", Variable::new(["time", "lat", "lon"], tas).unwrap())
        .unwrap()
        .with_var(
            "time_bnds",
            Variable::new(["time", "bnds"], ArrayD::zeros(IxDyn(&[steps, 2]))).unwrap(),
        )
        .unwrap()
        .with_var(
            "lat_bnds",
            Variable::new(["lat", "bnds"], ArrayD::zeros(IxDyn(&[nlat, 2]))).unwrap(),
        )
        .unwrap()
}

pub fn small_grid(first: i32, last: i32, value: impl Fn(i32) -> f64) -> Dataset {
    annual_dataset(first, last, vec![-10.0, 10.0], vec![0.0, 120.0, 240.0], value)
}
