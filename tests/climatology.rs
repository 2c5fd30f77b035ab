mod common;

use assert_matches::assert_matches;

use cmip_climatology::climatology::climatology;
use cmip_climatology::concat::{ModelSeries, concat_by_time};
use cmip_climatology::domain::YearWindow;
use cmip_climatology::error::ClimError;

use common::small_grid;

fn series_2010_2030() -> ModelSeries {
    // 2017 is missing everywhere
    let dataset = small_grid(2010, 2030, |year| {
        if year == 2017 { f64::NAN } else { f64::from(year - 2000) }
    })
    .drop_bounds();
    concat_by_time("M1", vec![dataset]).unwrap()
}

#[test]
fn window_mean_skips_missing_values() {
    let series = series_2010_2030();
    let result = climatology(&series, YearWindow::new(2015, 2020).unwrap()).unwrap();

    let tas = result.dataset.var("tas").unwrap();
    assert_eq!(tas.dims(), &["model", "lat", "lon"]);
    assert_eq!(tas.data().shape(), &[1, 2, 3]);
    let expected = (15.0 + 16.0 + 18.0 + 19.0 + 20.0) / 5.0;
    assert!(tas.data().iter().all(|value| *value == expected));
}

#[test]
fn time_coordinate_is_removed() {
    let series = series_2010_2030();
    let result = climatology(&series, YearWindow::new(2015, 2020).unwrap()).unwrap();
    assert!(result.dataset.time_axis().is_none());
    assert!(!result.dataset.dims().contains_key("time"));
    assert_eq!(result.dataset.index("lat").unwrap(), &[-10.0, 10.0]);
}

#[test]
fn single_year_window_selects_one_step() {
    let series = series_2010_2030();
    let result = climatology(&series, YearWindow::new(2012, 2012).unwrap()).unwrap();
    assert_eq!(result.dataset.var("tas").unwrap().data()[[0, 0, 0]], 12.0);
}

#[test]
fn window_outside_series_is_empty() {
    let series = series_2010_2030();
    let err = climatology(&series, YearWindow::new(2100, 2110).unwrap()).unwrap_err();
    assert_matches!(
        err,
        ClimError::EmptyWindow { model, year1: 2100, year2: 2110, first: 2010, last: 2030 }
            if model == "M1"
    );
}

#[test]
fn reversed_window_is_rejected() {
    assert_matches!(
        YearWindow::new(2020, 2015),
        Err(ClimError::InvalidYearWindow { start: 2020, end: 2015 })
    );
}
