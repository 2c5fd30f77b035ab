use ndarray::{ArrayViewD, Axis};

use crate::concat::ModelSeries;
use crate::dataset::{Dataset, TIME_DIM, Variable};
use crate::domain::YearWindow;
use crate::error::ClimError;

/// Time-mean of one model over a year window.
#[derive(Debug, Clone, PartialEq)]
pub struct ClimatologyResult {
    pub model: String,
    pub dataset: Dataset,
}

/// Mean of the non-NaN values; NaN when there are none.
pub fn nan_mean(values: ArrayViewD<'_, f64>) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|value| !value.is_nan())
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 { f64::NAN } else { sum / count as f64 }
}

/// Fails with `EmptyWindow` unless one of `years` lies in `window`.
pub fn ensure_window_covered(model: &str, years: &[i32], window: YearWindow) -> Result<(), ClimError> {
    if years.iter().any(|year| window.contains(*year)) {
        return Ok(());
    }
    Err(ClimError::EmptyWindow {
        model: model.to_string(),
        year1: window.start(),
        year2: window.end(),
        first: years.iter().copied().min().unwrap_or_default(),
        last: years.iter().copied().max().unwrap_or_default(),
    })
}

/// Averages every time-dependent variable over the steps whose calendar year
/// falls inside `window` (both ends inclusive).
pub fn climatology(series: &ModelSeries, window: YearWindow) -> Result<ClimatologyResult, ClimError> {
    let dataset = &series.dataset;
    let axis = dataset
        .time_axis()
        .ok_or_else(|| ClimError::MissingTimeAxis(series.model.clone()))?;
    let years = axis.years()?;
    ensure_window_covered(&series.model, &years, window)?;
    let selected = years
        .iter()
        .enumerate()
        .filter(|(_, year)| window.contains(**year))
        .map(|(index, _)| index)
        .collect::<Vec<_>>();

    let mut out = Dataset::new().with_attrs(dataset.attrs().clone());
    for (name, coord) in dataset.coords() {
        if !coord.has_dim(TIME_DIM) {
            out.insert_coord(name, coord.clone())?;
        }
    }
    for (name, var) in dataset.data_vars() {
        let reduced = match var.axis_of(TIME_DIM) {
            Some(axis) => {
                let data = var
                    .data()
                    .select(Axis(axis), &selected)
                    .map_axis(Axis(axis), |lane| nan_mean(lane.into_dyn()));
                let dims = var
                    .dims()
                    .iter()
                    .filter(|dim| dim.as_str() != TIME_DIM)
                    .cloned()
                    .collect::<Vec<_>>();
                Variable::new(dims, data)?.with_attrs(var.attrs().clone())
            }
            None => var.clone(),
        };
        out.insert_var(name, reduced)?;
    }

    tracing::debug!(
        model = %series.model,
        window = %window,
        steps = selected.len(),
        "reduced climatology"
    );
    Ok(ClimatologyResult {
        model: series.model.clone(),
        dataset: out,
    })
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, IxDyn};

    use super::*;

    #[test]
    fn nan_mean_skips_missing_values() {
        let values = ArrayD::from_shape_vec(IxDyn(&[4]), vec![1.0, f64::NAN, 3.0, 5.0]).unwrap();
        assert_eq!(nan_mean(values.view()), 3.0);
        let empty = ArrayD::from_elem(IxDyn(&[2]), f64::NAN);
        assert!(nan_mean(empty.view()).is_nan());
    }
}
