use std::collections::{BTreeMap, BTreeSet};

use ndarray::{ArrayD, Axis};

use crate::climatology::ClimatologyResult;
use crate::dataset::{Coordinate, Dataset, MODEL_DIM, Variable, align_outer};
use crate::error::ClimError;

/// Per-model climatologies stacked along the `model` dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedClimatology {
    models: Vec<String>,
    dataset: Dataset,
}

impl MergedClimatology {
    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn into_dataset(self) -> Dataset {
        self.dataset
    }

    pub fn dims(&self) -> BTreeMap<String, usize> {
        self.dataset.dims()
    }

    pub fn coord_values(&self, name: &str) -> Option<&[f64]> {
        self.dataset.coord(name).and_then(Coordinate::as_slice)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.dataset.var(name)
    }

    /// The slice of `variable` belonging to `model`, e.g. a (lat, lon) map.
    pub fn model_slice(&self, variable: &str, model: &str) -> Result<ArrayD<f64>, ClimError> {
        let var = self
            .variable(variable)
            .ok_or_else(|| ClimError::NotFound(format!("variable {variable}")))?;
        let position = self
            .models
            .iter()
            .position(|name| name == model)
            .ok_or_else(|| ClimError::NotFound(format!("model {model}")))?;
        let axis = var
            .axis_of(MODEL_DIM)
            .ok_or_else(|| ClimError::NotFound(format!("{MODEL_DIM} dimension of {variable}")))?;
        Ok(var.data().index_axis(Axis(axis), position).to_owned())
    }
}

/// Stacks model results in input order. Index coordinates are outer-joined
/// and always kept; other coordinates survive only when every model agrees on
/// them.
pub fn merge_models(results: Vec<ClimatologyResult>) -> Result<MergedClimatology, ClimError> {
    if results.is_empty() {
        return Err(ClimError::Merge("no model results to merge".to_string()));
    }
    let mut seen = BTreeSet::new();
    for result in &results {
        if !seen.insert(result.model.as_str()) {
            return Err(ClimError::Merge(format!("model {} appears twice", result.model)));
        }
    }

    let first = &results[0];
    let expected = first.dataset.data_vars().keys().collect::<BTreeSet<_>>();
    for result in &results {
        let found = result.dataset.data_vars().keys().collect::<BTreeSet<_>>();
        if found != expected {
            return Err(ClimError::Merge(format!(
                "model {} has variables {found:?}, model {} has {expected:?}",
                result.model, first.model
            )));
        }
        for (name, var) in first.dataset.data_vars() {
            let dims = result.dataset.var(name).map(Variable::dims).unwrap_or_default();
            if dims != var.dims() {
                return Err(ClimError::Merge(format!(
                    "variable {name} has dimensions {dims:?} for model {} but {:?} for model {}",
                    result.model,
                    var.dims(),
                    first.model
                )));
            }
            if !dims.iter().any(|dim| dim == MODEL_DIM) {
                return Err(ClimError::Merge(format!(
                    "variable {name} of model {} has no {MODEL_DIM} dimension",
                    result.model
                )));
            }
        }
    }

    let models = results.iter().map(|result| result.model.clone()).collect::<Vec<_>>();
    let datasets = align_outer(
        results.into_iter().map(|result| result.dataset).collect(),
        MODEL_DIM,
    )
    .map_err(ClimError::Merge)?;

    let first = &datasets[0];
    let mut out = Dataset::new().with_attrs(first.attrs().clone());
    for (name, coord) in first.coords() {
        if name == MODEL_DIM {
            continue;
        }
        // index coordinates only need equal values, attrs come from the first model
        let is_index = coord.dims().len() == 1 && coord.dims()[0] == *name;
        let shared = !coord.has_dim(MODEL_DIM)
            && datasets[1..].iter().all(|dataset| match dataset.coord(name) {
                Some(other) if is_index => other.values() == coord.values(),
                other => other == Some(coord),
            });
        if shared {
            out.insert_coord(name, coord.clone())?;
        } else {
            tracing::warn!(coordinate = %name, "dropping coordinate that differs between models");
        }
    }

    for (name, var) in first.data_vars() {
        let axis = var.axis_of(MODEL_DIM).unwrap_or_default();
        let views = datasets
            .iter()
            .filter_map(|dataset| dataset.var(name))
            .map(|var| var.data().view())
            .collect::<Vec<_>>();
        let data = ndarray::concatenate(Axis(axis), &views)
            .map_err(|err| ClimError::Merge(format!("variable {name}: {err}")))?;
        out.insert_var(
            name,
            Variable::new(var.dims().to_vec(), data)?.with_attrs(var.attrs().clone()),
        )?;
    }
    out.insert_coord(MODEL_DIM, Coordinate::labels(MODEL_DIM, models.clone()))?;

    tracing::info!(models = models.len(), "merged model climatologies");
    Ok(MergedClimatology {
        models,
        dataset: out,
    })
}
