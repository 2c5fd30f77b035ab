mod common;

use assert_matches::assert_matches;

use cmip_climatology::calendar::timestamp;
use cmip_climatology::concat::concat_by_time;
use cmip_climatology::error::ClimError;

use common::{annual_dataset, small_grid};

#[test]
fn experiments_are_ordered_by_first_timestamp() {
    let ssp = small_grid(2015, 2020, |year| f64::from(year)).drop_bounds();
    let historical = small_grid(2010, 2014, |year| f64::from(year)).drop_bounds();

    let series = concat_by_time("M1", vec![ssp, historical]).unwrap();
    let stamps = series.dataset.time_axis().unwrap().as_timestamps().unwrap();
    assert_eq!(stamps.len(), 11);
    assert_eq!(stamps[0], timestamp(2010, 7, 1).unwrap());
    assert_eq!(stamps[10], timestamp(2020, 7, 1).unwrap());

    let tas = series.dataset.var("tas").unwrap();
    assert_eq!(tas.dims(), &["model", "time", "lat", "lon"]);
    assert_eq!(tas.data().shape(), &[1, 11, 2, 3]);
    assert_eq!(tas.data()[[0, 5, 1, 2]], 2015.0);
    assert_eq!(
        series.dataset.coord("model").unwrap().as_labels().unwrap(),
        &["M1".to_string()]
    );
}

#[test]
fn differing_grids_are_outer_joined() {
    let a = annual_dataset(2015, 2016, vec![0.0, 1.0], vec![5.0], |_| 1.0).drop_bounds();
    let b = annual_dataset(2017, 2018, vec![1.0, 2.0], vec![5.0], |_| 2.0).drop_bounds();

    let series = concat_by_time("M1", vec![a, b]).unwrap();
    assert_eq!(series.dataset.index("lat").unwrap(), &[0.0, 1.0, 2.0]);
    let tas = series.dataset.var("tas").unwrap().data();
    assert_eq!(tas.shape(), &[1, 4, 3, 1]);
    assert!(tas[[0, 0, 2, 0]].is_nan());
    assert!(tas[[0, 3, 0, 0]].is_nan());
    assert_eq!(tas[[0, 3, 2, 0]], 2.0);
}

#[test]
fn mismatched_variables_are_rejected() {
    let a = small_grid(2015, 2016, |_| 1.0).drop_bounds();
    let b = small_grid(2017, 2018, |_| 1.0);
    let err = concat_by_time("M1", vec![a, b]).unwrap_err();
    assert_matches!(err, ClimError::Concatenation { model, .. } if model == "M1");
}

#[test]
fn nothing_to_concatenate_is_an_error() {
    assert_matches!(
        concat_by_time("M1", Vec::new()),
        Err(ClimError::Concatenation { .. })
    );
}
