use std::collections::BTreeSet;

use ndarray::{ArrayD, ArrayViewD, Axis};

use crate::calendar::TimeAxis;
use crate::dataset::{
    CoordValues, Coordinate, Dataset, MODEL_DIM, TIME_DIM, Variable, align_outer,
};
use crate::error::ClimError;

/// All experiments of one model joined into a single time series.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSeries {
    pub model: String,
    pub dataset: Dataset,
}

fn first_timestamp(dataset: &Dataset) -> Option<chrono::NaiveDateTime> {
    dataset
        .time_axis()
        .and_then(TimeAxis::as_timestamps)
        .and_then(|stamps| stamps.first().copied())
}

fn concatenate(axis: usize, arrays: &[ArrayViewD<'_, f64>]) -> Result<ArrayD<f64>, String> {
    ndarray::concatenate(Axis(axis), arrays).map_err(|err| err.to_string())
}

/// Concatenates the datasets of `model` along time, outer-joining every other
/// indexed dimension, and tags the result with a length-1 `model` dimension.
pub fn concat_by_time(model: &str, datasets: Vec<Dataset>) -> Result<ModelSeries, ClimError> {
    let fail = |reason: String| ClimError::Concatenation {
        model: model.to_string(),
        reason,
    };
    if datasets.is_empty() {
        return Err(fail("no datasets to concatenate".to_string()));
    }
    for dataset in &datasets {
        if dataset.time_axis().and_then(TimeAxis::as_timestamps).is_none() {
            return Err(fail("dataset has no normalized time axis".to_string()));
        }
        if dataset.dims().contains_key(MODEL_DIM) {
            return Err(fail(format!("dataset already has a {MODEL_DIM} dimension")));
        }
    }

    let mut datasets = datasets;
    datasets.sort_by_key(first_timestamp);

    let expected = datasets[0].data_vars().keys().collect::<BTreeSet<_>>();
    for dataset in &datasets[1..] {
        let found = dataset.data_vars().keys().collect::<BTreeSet<_>>();
        if found != expected {
            return Err(fail(format!(
                "data variables differ: {expected:?} vs {found:?}"
            )));
        }
    }

    let datasets = align_outer(datasets, TIME_DIM).map_err(fail)?;
    let first = &datasets[0];
    let mut out = Dataset::new().with_attrs(first.attrs().clone());

    let stamps = datasets
        .iter()
        .flat_map(|dataset| {
            dataset
                .time_axis()
                .and_then(TimeAxis::as_timestamps)
                .unwrap_or_default()
                .iter()
                .copied()
        })
        .collect::<Vec<_>>();
    let time_attrs = first
        .coord(TIME_DIM)
        .map(|coord| coord.attrs().clone())
        .unwrap_or_default();
    out.insert_coord(
        TIME_DIM,
        Coordinate::time(TimeAxis::Timestamps(stamps)).with_attrs(time_attrs),
    )
    .map_err(|err| fail(err.to_string()))?;

    for (name, coord) in first.coords() {
        if name == TIME_DIM {
            continue;
        }
        let merged = if coord.has_dim(TIME_DIM) {
            let axis = coord
                .dims()
                .iter()
                .position(|dim| dim == TIME_DIM)
                .unwrap_or_default();
            let mut views = Vec::with_capacity(datasets.len());
            for dataset in &datasets {
                match dataset.coord(name).map(Coordinate::values) {
                    Some(CoordValues::Numeric(values)) => views.push(values.view()),
                    _ => {
                        return Err(fail(format!(
                            "coordinate {name} is not numeric in every dataset"
                        )));
                    }
                }
            }
            Coordinate::numeric_nd(coord.dims().to_vec(), concatenate(axis, &views).map_err(&fail)?)?
                .with_attrs(coord.attrs().clone())
        } else {
            coord.clone()
        };
        out.insert_coord(name, merged)
            .map_err(|err| fail(err.to_string()))?;
    }

    for (name, var) in first.data_vars() {
        let mut views = Vec::with_capacity(datasets.len());
        for dataset in &datasets {
            let other = dataset
                .var(name)
                .ok_or_else(|| fail(format!("variable {name} is missing")))?;
            if other.dims() != var.dims() {
                return Err(fail(format!(
                    "variable {name} has dimensions {:?} and {:?}",
                    var.dims(),
                    other.dims()
                )));
            }
            views.push(other.data().view());
        }
        let data = match var.axis_of(TIME_DIM) {
            Some(axis) => concatenate(axis, &views).map_err(&fail)?,
            None => var.data().clone(),
        };
        let mut dims = var.dims().to_vec();
        dims.insert(0, MODEL_DIM.to_string());
        let tagged = Variable::new(dims, data.insert_axis(Axis(0)))?.with_attrs(var.attrs().clone());
        out.insert_var(name, tagged)
            .map_err(|err| fail(err.to_string()))?;
    }

    out.insert_coord(
        MODEL_DIM,
        Coordinate::labels(MODEL_DIM, vec![model.to_string()]),
    )
    .map_err(|err| fail(err.to_string()))?;

    tracing::debug!(model, steps = out.time_axis().map(TimeAxis::len).unwrap_or(0), "concatenated series");
    Ok(ModelSeries {
        model: model.to_string(),
        dataset: out,
    })
}
