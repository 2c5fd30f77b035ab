mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use ndarray::{ArrayD, IxDyn};

use cmip_climatology::calendar::{Calendar, TimeAxis, timestamp};
use cmip_climatology::catalog::CatalogRow;
use cmip_climatology::dataset::{Coordinate, Dataset, Variable};
use cmip_climatology::domain::GroupKey;
use cmip_climatology::error::ClimError;
use cmip_climatology::loader::{LazyDatasetLoader, open_group};

use common::{MemoryStore, small_grid};

#[test]
fn two_rows_in_one_group_is_multiple_match() {
    let store = MemoryStore::default().with("a", small_grid(2015, 2016, |_| 1.0));
    let key = GroupKey::new("M1", "ssp585");
    let rows = vec![
        CatalogRow::new("M1", "ssp585", "a").with_facet("member_id", "r1i1p1f1"),
        CatalogRow::new("M1", "ssp585", "b").with_facet("member_id", "r2i1p1f1"),
    ];
    let err = open_group(&store, &key, &rows).unwrap_err();
    assert_matches!(err, ClimError::MultipleMatch { group, count: 2 } if group == key);
    assert!(store.opened.lock().unwrap().is_empty());
}

#[test]
fn bounds_variables_are_dropped() {
    let store = MemoryStore::default().with("a", small_grid(2015, 2016, |_| 1.0));
    let key = GroupKey::new("M1", "ssp585");
    let dataset = open_group(&store, &key, &[CatalogRow::new("M1", "ssp585", "a")]).unwrap();

    let coords = dataset.coords().keys().map(String::as_str).collect::<Vec<_>>();
    assert_eq!(coords, vec!["lat", "lon", "time"]);
    let vars = dataset.data_vars().keys().map(String::as_str).collect::<Vec<_>>();
    assert_eq!(vars, vec!["tas"]);
}

#[test]
fn non_standard_calendar_becomes_timestamps() {
    let axis = TimeAxis::Encoded {
        calendar: Calendar::Day360,
        units: "days since 2015-01-01".parse().unwrap(),
        offsets: vec![15.0, 45.0, 405.0],
    };
    let dataset = Dataset::new()
        .with_coord("time", Coordinate::time(axis))
        .unwrap()
        .with_var(
            "tas",
            Variable::new(["time"], ArrayD::from_elem(IxDyn(&[3]), 280.0)).unwrap(),
        )
        .unwrap();
    let store = MemoryStore::default().with("noleap", dataset);
    let key = GroupKey::new("M2", "ssp585");

    let opened = open_group(&store, &key, &[CatalogRow::new("M2", "ssp585", "noleap")]).unwrap();
    let axis = opened.time_axis().unwrap();
    assert!(axis.is_standard());
    assert_eq!(
        axis.as_timestamps().unwrap(),
        &[
            timestamp(2015, 1, 16).unwrap(),
            timestamp(2015, 2, 16).unwrap(),
            timestamp(2016, 2, 16).unwrap(),
        ]
    );
}

#[test]
fn store_failures_name_the_locator() {
    let store = MemoryStore::default();
    let key = GroupKey::new("M1", "historical");
    let err = open_group(&store, &key, &[CatalogRow::new("M1", "historical", "gs://x/y")])
        .unwrap_err();
    assert_matches!(err, ClimError::DatasetOpen { locator, group, message } => {
        assert_eq!(locator, "gs://x/y");
        assert_eq!(group, key);
        assert!(message.contains("not found"));
    });
}

#[test]
fn dataset_without_time_is_an_open_error() {
    let dataset = Dataset::new()
        .with_coord("lat", Coordinate::numeric("lat", vec![0.0]))
        .unwrap();
    let store = MemoryStore::default().with("static", dataset);
    let key = GroupKey::new("M1", "ssp585");
    let err = open_group(&store, &key, &[CatalogRow::new("M1", "ssp585", "static")]).unwrap_err();
    assert_matches!(err, ClimError::DatasetOpen { message, .. } if message.contains("time"));
}

#[test]
fn deferred_open_runs_only_when_forced() {
    let store = Arc::new(MemoryStore::default().with("a", small_grid(2015, 2015, |_| 2.0)));
    let loader = LazyDatasetLoader::new(Arc::clone(&store));
    let node = loader.deferred_open(
        GroupKey::new("M1", "ssp585"),
        vec![CatalogRow::new("M1", "ssp585", "a")],
    );
    assert!(store.opened.lock().unwrap().is_empty());
    let dataset = node.force().unwrap();
    assert_eq!(store.opened.lock().unwrap().as_slice(), &["a".to_string()]);
    assert_eq!(dataset.dims()["time"], 1);
}
